pub mod assignments;
pub mod attendance;
pub mod classes;
pub mod core;
pub mod feedback;
pub mod grades;
pub mod sessions;
pub mod settings;
pub mod subjects;
pub mod users;
