use std::path::PathBuf;

pub fn default_version() -> u32 {
    1
}

pub fn default_base_dir() -> PathBuf {
    PathBuf::from("batch_0")
}

pub fn default_state_dir() -> PathBuf {
    PathBuf::from(".treereduce")
}

pub fn default_concurrency() -> usize {
    6
}

pub fn default_launch_delay_ms() -> u64 {
    0
}

pub fn default_fan_in() -> usize {
    2
}

pub fn default_cancel_ttl_sec() -> u64 {
    86_400 // one day
}

pub fn default_seed_count() -> u64 {
    20
}

pub fn default_max_attempts() -> u32 {
    1
}

pub fn default_backoff_base_ms() -> u64 {
    1000
}
