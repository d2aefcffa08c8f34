pub mod fs;
pub mod scripted;

pub use fs::create_file;
pub use scopeguard::defer;
pub use scripted::ScriptedEngine;
