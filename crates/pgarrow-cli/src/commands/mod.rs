mod mirror;
mod publish;
mod replay;
mod status;

pub use mirror::cmd_mirror;
pub use publish::cmd_publish;
pub use replay::cmd_replay;
pub use status::cmd_status;
