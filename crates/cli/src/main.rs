//! Lectern CLI - course catalog and learner progress operations.

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::Result;
use clap::{Parser, Subcommand};
use lectern_content::{
    BasicCatalogService, BasicReorderCoordinator, BasicStatsAggregator, CatalogService,
    ReorderCoordinator, StatsAggregator,
};
use lectern_core::{
    Conflict, CourseId, Error, LectureId, LectureState, ModuleId, NewCourse, NewLecture,
    NewModule, Progress, ProgressStatus, ProgressUpdate, UserId,
};
use lectern_progress::{BasicProgressTracker, ProgressTracker};
use lectern_storage::{JsonStorage, Storage};
use tracing::{warn, Level};

#[derive(Parser)]
#[command(name = "lectern")]
#[command(about = "Course catalog and learner progress manager", long_about = None)]
struct Cli {
    /// Directory holding the JSON data files
    #[arg(long, global = true, default_value = ".lectern")]
    data_dir: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create a demo course with a few modules and lectures
    Seed,
    /// Create a course
    AddCourse {
        /// Course title
        title: String,
        /// Course description
        #[arg(long, default_value = "")]
        description: String,
    },
    /// List courses
    Courses {
        /// Only active courses
        #[arg(long)]
        active: bool,
    },
    /// Show a course with its modules and lectures
    Course {
        /// Course ID
        id: String,
    },
    /// Append a module to a course
    AddModule {
        /// Course ID
        course: String,
        /// Module title
        title: String,
    },
    /// Append a lecture to a module
    AddLecture {
        /// Module ID
        module: String,
        /// Lecture title
        title: String,
        /// Playback length in minutes
        #[arg(long)]
        duration: u32,
    },
    /// Delete a course with everything under it
    RemoveCourse {
        /// Course ID
        id: String,
    },
    /// Delete a module and its lectures
    RemoveModule {
        /// Module ID
        id: String,
    },
    /// Delete a lecture
    RemoveLecture {
        /// Lecture ID
        id: String,
    },
    /// Renumber a course's modules to the given order
    ReorderModules {
        /// Course ID
        course: String,
        /// Module IDs in the desired order
        #[arg(num_args = 1..)]
        ids: Vec<String>,
    },
    /// Renumber a module's lectures to the given order
    ReorderLectures {
        /// Module ID
        module: String,
        /// Lecture IDs in the desired order
        #[arg(num_args = 1..)]
        ids: Vec<String>,
    },
    /// Copy a module and its active lectures to the end of the course
    DuplicateModule {
        /// Module ID
        id: String,
    },
    /// Copy a lecture to the end of its module
    DuplicateLecture {
        /// Lecture ID
        id: String,
    },
    /// Re-derive cached counters for a course and all its modules
    Recompute {
        /// Course ID
        course: String,
    },
    /// Print a fresh user ID
    UserId,
    /// Snapshot a course for a user, replacing any existing record
    Init {
        /// User ID
        user: String,
        /// Course ID
        course: String,
    },
    /// Report watch activity on a lecture
    Watch {
        /// User ID
        user: String,
        /// Course ID
        course: String,
        /// Lecture ID
        lecture: String,
        /// Watch position in seconds
        #[arg(long)]
        watch_time: Option<u32>,
        /// Mark completed (true) or revoke completion (false)
        #[arg(long)]
        complete: Option<bool>,
    },
    /// Show the lecture a user should watch next
    Next {
        /// User ID
        user: String,
        /// Course ID
        course: String,
    },
    /// Check whether a lecture is accessible to a user
    Unlocked {
        /// User ID
        user: String,
        /// Course ID
        course: String,
        /// Lecture ID
        lecture: String,
    },
    /// Show a user's progress in a course
    Progress {
        /// User ID
        user: String,
        /// Course ID
        course: String,
    },
    /// Discard a user's progress and snapshot the course afresh
    Reset {
        /// User ID
        user: String,
        /// Course ID
        course: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_max_level(Level::INFO)
        .init();

    let cli = Cli::parse();

    let storage = Arc::new(JsonStorage::new(&cli.data_dir).await?);
    let catalog = BasicCatalogService::new(storage.clone());
    let coordinator = BasicReorderCoordinator::new(storage.clone());
    let aggregator = BasicStatsAggregator::new(storage.clone());
    let tracker = BasicProgressTracker::new(storage.clone());

    match cli.command {
        Commands::Seed => {
            let course = catalog
                .create_course(NewCourse {
                    title: "Rust Fundamentals".into(),
                    description: "From zero to ownership".into(),
                })
                .await?;
            let basics = catalog
                .create_module(course.id, NewModule { title: "Getting Started".into() })
                .await?;
            let ownership = catalog
                .create_module(course.id, NewModule { title: "Ownership".into() })
                .await?;
            for (module, title, duration) in [
                (basics.id, "Installation", 8),
                (basics.id, "Hello, World", 12),
                (ownership.id, "Moves", 15),
                (ownership.id, "Borrowing", 18),
                (ownership.id, "Lifetimes", 22),
            ] {
                catalog
                    .create_lecture(module, NewLecture { title: title.into(), duration })
                    .await?;
            }
            print_course_tree(&catalog, course.id).await?;
        }
        Commands::AddCourse { title, description } => {
            let course = catalog.create_course(NewCourse { title, description }).await?;
            println!("Added course: {} - {}", course.id, course.title);
        }
        Commands::Courses { active } => {
            let courses = catalog.list_courses(active).await?;
            println!("Courses ({})", courses.len());
            for course in courses {
                println!(
                    "  {} | {} | {} modules | {} min - {}",
                    course.id,
                    if course.is_active { "ACTIVE" } else { "INACTIVE" },
                    course.total_modules,
                    course.total_duration,
                    course.title,
                );
            }
        }
        Commands::Course { id } => {
            let course_id = parse_id(&id, "course")?;
            print_course_tree(&catalog, course_id).await?;
        }
        Commands::AddModule { course, title } => {
            let course_id = parse_id(&course, "course")?;
            let module = catalog.create_module(course_id, NewModule { title }).await?;
            println!(
                "Added module {} at position {}: {}",
                module.id, module.module_number, module.title
            );
        }
        Commands::AddLecture { module, title, duration } => {
            let module_id = parse_id(&module, "module")?;
            let lecture = catalog
                .create_lecture(module_id, NewLecture { title, duration })
                .await?;
            println!(
                "Added lecture {} at position {}: {} ({} min)",
                lecture.id, lecture.lecture_number, lecture.title, lecture.duration
            );
        }
        Commands::RemoveCourse { id } => {
            let course_id = parse_id(&id, "course")?;
            catalog.delete_course(course_id).await?;
            println!("Removed course {course_id}");
        }
        Commands::RemoveModule { id } => {
            let module_id = parse_id(&id, "module")?;
            catalog.delete_module(module_id).await?;
            println!("Removed module {module_id}");
        }
        Commands::RemoveLecture { id } => {
            let lecture_id = parse_id(&id, "lecture")?;
            catalog.delete_lecture(lecture_id).await?;
            println!("Removed lecture {lecture_id}");
        }
        Commands::ReorderModules { course, ids } => {
            let course_id = parse_id(&course, "course")?;
            let ordered = ids
                .iter()
                .map(|raw| parse_id::<ModuleId>(raw, "module"))
                .collect::<Result<Vec<_>>>()?;
            let modules = coordinator.reorder_modules(course_id, &ordered).await?;
            for module in modules {
                println!("  {}. {} ({})", module.module_number, module.title, module.id);
            }
        }
        Commands::ReorderLectures { module, ids } => {
            let module_id = parse_id(&module, "module")?;
            let ordered = ids
                .iter()
                .map(|raw| parse_id::<LectureId>(raw, "lecture"))
                .collect::<Result<Vec<_>>>()?;
            let lectures = coordinator.reorder_lectures(module_id, &ordered).await?;
            for lecture in lectures {
                println!(
                    "  {}. {} ({})",
                    lecture.lecture_number, lecture.title, lecture.id
                );
            }
        }
        Commands::DuplicateModule { id } => {
            let module_id = parse_id(&id, "module")?;
            let copy = coordinator.duplicate_module(module_id).await?;
            println!(
                "Duplicated as {} at position {}: {} ({} lectures)",
                copy.id, copy.module_number, copy.title, copy.lecture_count
            );
        }
        Commands::DuplicateLecture { id } => {
            let lecture_id = parse_id(&id, "lecture")?;
            let copy = coordinator.duplicate_lecture(lecture_id).await?;
            println!(
                "Duplicated as {} at position {}: {}",
                copy.id, copy.lecture_number, copy.title
            );
        }
        Commands::Recompute { course } => {
            let course_id = parse_id(&course, "course")?;
            for module in storage.modules_by_course(course_id, false).await? {
                aggregator.recompute_module_stats(module.id).await?;
            }
            let stats = aggregator.recompute_course_stats(course_id).await?;
            println!(
                "Course {}: {} modules | {} lectures | {} min",
                course_id, stats.total_modules, stats.total_lectures, stats.total_duration
            );
        }
        Commands::UserId => {
            println!("{}", UserId::new());
        }
        Commands::Init { user, course } => {
            let (user_id, course_id) = parse_pair(&user, &course)?;
            let progress = tracker.initialize_for_course(user_id, course_id).await?;
            print_progress(&progress);
        }
        Commands::Watch { user, course, lecture, watch_time, complete } => {
            let (user_id, course_id) = parse_pair(&user, &course)?;
            let lecture_id = parse_id(&lecture, "lecture")?;
            let update = ProgressUpdate {
                watch_time,
                is_completed: complete,
            };

            // Retry once when the write races another writer
            let mut attempts = 0;
            let progress = loop {
                match tracker
                    .update_lecture_progress(user_id, course_id, lecture_id, update.clone())
                    .await
                {
                    Ok(progress) => break progress,
                    Err(Error::Conflict(Conflict::StaleVersion { .. })) if attempts < 1 => {
                        warn!("progress write raced with another writer, retrying");
                        attempts += 1;
                    }
                    Err(e) => return Err(e.into()),
                }
            };
            print_progress(&progress);
        }
        Commands::Next { user, course } => {
            let (user_id, course_id) = parse_pair(&user, &course)?;
            match tracker.next_unlocked_lecture(user_id, course_id).await? {
                Some(lecture_id) => println!("Next unlocked lecture: {lecture_id}"),
                None => println!("Course completed, nothing left to unlock"),
            }
        }
        Commands::Unlocked { user, course, lecture } => {
            let (user_id, course_id) = parse_pair(&user, &course)?;
            let lecture_id = parse_id(&lecture, "lecture")?;
            let unlocked = tracker
                .is_lecture_unlocked(user_id, course_id, lecture_id)
                .await?;
            println!("Lecture {lecture_id} unlocked: {unlocked}");
        }
        Commands::Progress { user, course } => {
            let (user_id, course_id) = parse_pair(&user, &course)?;
            let progress = tracker.get_or_initialize(user_id, course_id).await?;
            print_progress(&progress);
        }
        Commands::Reset { user, course } => {
            let (user_id, course_id) = parse_pair(&user, &course)?;
            let progress = tracker.reset(user_id, course_id).await?;
            print_progress(&progress);
        }
    }

    Ok(())
}

async fn print_course_tree<C: CatalogService>(catalog: &C, course_id: CourseId) -> Result<()> {
    let course = catalog.get_course(course_id).await?;
    println!("Course: {} - {}", course.id, course.title);
    if !course.description.is_empty() {
        println!("  {}", course.description);
    }
    println!(
        "  {} | {} modules | {} lectures | {} min",
        if course.is_active { "ACTIVE" } else { "INACTIVE" },
        course.total_modules,
        course.total_lectures,
        course.total_duration,
    );
    for module in catalog.list_modules(course_id, false).await? {
        println!(
            "  {}. {} ({}) | {} lectures | {} min",
            module.module_number, module.title, module.id, module.lecture_count, module.total_duration
        );
        for lecture in catalog.list_lectures(module.id, false).await? {
            println!(
                "     {}.{} {} ({}) | {} min",
                module.module_number,
                lecture.lecture_number,
                lecture.title,
                lecture.id,
                lecture.duration,
            );
        }
    }
    Ok(())
}

fn print_progress(progress: &Progress) {
    println!(
        "Progress for user {} in course {}",
        progress.user_id, progress.course_id
    );
    println!(
        "  {} | {}% | {}/{} lectures | {}/{} modules | v{}",
        format_status(progress.status()),
        progress.progress_percentage,
        progress.completed_lectures,
        progress.total_lectures,
        progress.completed_modules,
        progress.total_modules,
        progress.version,
    );
    let states: HashMap<LectureId, LectureState> = progress.lecture_states().into_iter().collect();
    for module in &progress.modules {
        println!(
            "  Module {} | {} | {}/{} lectures",
            module.module_number,
            format_status(module.status()),
            module.completed_lectures,
            module.total_lectures(),
        );
        for lecture in &module.lectures {
            let state = states
                .get(&lecture.lecture_id)
                .copied()
                .unwrap_or(LectureState::Locked);
            println!(
                "    [{}] lecture {} | {}s watched | {}",
                format_state(state),
                lecture.lecture_number,
                lecture.watch_time,
                lecture.lecture_id,
            );
        }
    }
}

fn parse_id<T: std::str::FromStr>(raw: &str, what: &str) -> Result<T> {
    raw.parse()
        .map_err(|_| anyhow::anyhow!("invalid {what} id: {raw}"))
}

fn parse_pair(user: &str, course: &str) -> Result<(UserId, CourseId)> {
    Ok((parse_id(user, "user")?, parse_id(course, "course")?))
}

fn format_status(status: ProgressStatus) -> &'static str {
    match status {
        ProgressStatus::NotStarted => "NOT STARTED",
        ProgressStatus::InProgress => "IN PROGRESS",
        ProgressStatus::Completed => "COMPLETED",
    }
}

fn format_state(state: LectureState) -> &'static str {
    match state {
        LectureState::Locked => "LOCKED",
        LectureState::Unlocked => "UNLOCKED",
        LectureState::Completed => "COMPLETED",
    }
}
