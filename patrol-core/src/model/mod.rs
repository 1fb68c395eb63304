mod account;
mod device;
mod live_activity;
mod subreddit;
mod user;
mod watcher;

pub use account::Account;
pub use device::{Device, DeviceAccountLink};
pub use live_activity::LiveActivity;
pub use subreddit::Subreddit;
pub use user::WatchedUser;
pub use watcher::{Watcher, WatcherType};
