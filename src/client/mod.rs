pub mod device;
pub mod matching;
pub mod presence;
pub mod remote;
pub mod task;
pub mod wait;
