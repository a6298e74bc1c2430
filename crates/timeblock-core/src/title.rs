//! Calendar event titles.
//!
//! Pure rendering of a task into the display strings used for its calendar
//! events, so every relevant user's calendar shows the same wording.

use crate::model::Task;

/// Title of a scheduled work block.
pub fn work_unit_title(task: &Task) -> String {
    let mut title = task.name.clone();
    for tag in &task.tags {
        title.push_str(" #");
        title.push_str(tag);
    }
    title
}

/// Title of the due-date marker event.
pub fn due_title(task: &Task) -> String {
    format!("Due: {}", task.name)
}
