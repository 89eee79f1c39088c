//! Roster file loading.
//!
//! The roster is produced by an out-of-band import and dropped next to the
//! state file. It is read once at startup; when it parses, it replaces the
//! stored student list wholesale, and when it is missing or unreadable the
//! previously stored roster stays in effect.
//!
//! Both shapes are accepted: a JSON array of students, or a single student
//! object, which is wrapped into a one-element roster.

use std::fs;
use std::path::Path;

use log::{info, warn};
use serde::Deserialize;

use lunchline_core::Student;

#[derive(Deserialize)]
#[serde(untagged)]
enum RosterFile {
    Many(Vec<Student>),
    One(Box<Student>),
}

fn is_meaningful(student: &Student) -> bool {
    !(student.id.is_empty() && student.first_name.is_empty() && student.last_name.is_empty())
}

/// Read the roster file. `None` means "leave the stored roster alone".
pub fn load_roster(path: &Path) -> Option<Vec<Student>> {
    let text = match fs::read_to_string(path) {
        Ok(text) => text,
        Err(e) => {
            info!("No roster file at {}: {e}", path.display());
            return None;
        }
    };

    match serde_json::from_str::<RosterFile>(&text) {
        Ok(RosterFile::Many(students)) => {
            info!("Loaded roster from {}: {} students", path.display(), students.len());
            Some(students)
        }
        Ok(RosterFile::One(student)) if is_meaningful(&student) => {
            info!("Loaded roster from {}: single entry", path.display());
            Some(vec![*student])
        }
        Ok(RosterFile::One(_)) => {
            warn!(
                "Roster file {} is an object with no student fields; keeping stored roster",
                path.display()
            );
            None
        }
        Err(e) => {
            warn!(
                "Roster file {} is unreadable: {e}; keeping stored roster",
                path.display()
            );
            None
        }
    }
}
