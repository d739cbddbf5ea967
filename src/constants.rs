pub const DEFAULT_PAGE: u64 = 1;
pub const DEFAULT_PAGE_LIMIT: u64 = 20;
pub const MAX_PAGE_LIMIT: u64 = 100;

/// Inclusive bounds for a single claim's randomly awarded points
pub const AWARD_MIN: i64 = 1;
pub const AWARD_MAX: i64 = 10;

pub const LEADERBOARD_CHANGED: &str = "leaderboard:changed";
pub const SOCKET_CONNECTED: &str = "connected";

/// Buffered notifications per subscriber before it starts lagging
pub const NOTIFY_CAPACITY: usize = 16;

/// Display name used for claims whose user has since disappeared
pub const UNKNOWN_USER_NAME: &str = "Unknown";

pub const SEED_USERS: [&str; 10] = [
    "Rahul", "Kamal", "Sanak", "Priya", "Aisha", "Rohan", "Vikas", "Meera", "Anita", "Dev",
];
