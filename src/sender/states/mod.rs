mod capture_off;
mod capture_on;
mod flush;
mod init;
mod terminal;

pub use capture_off::CaptureOffState;
pub use capture_on::CaptureOnState;
pub use flush::FlushState;
pub use init::InitState;
pub use terminal::TerminalState;
