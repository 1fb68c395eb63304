pub mod ports;
pub mod postgres;

pub use ports::{
    AccountRepository, DeviceRepository, LiveActivityRepository, SubredditRepository,
    WatchedUserRepository, WatcherRepository,
};
pub use postgres::PostgresStore;
