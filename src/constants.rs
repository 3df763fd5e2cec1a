// Fundamental configuration constants
pub const DEFAULT_HOST: &str = "0.0.0.0";
pub const DEFAULT_PORT: u16 = 3001;
pub const WS_PATH: &str = "ws";
pub const HEALTH_PATH: &str = "health";
pub const ROOMS_PATH: &str = "rooms";

// Largest inbound text frame accepted from a client, in bytes
pub const DEFAULT_MAX_MESSAGE_SIZE: usize = 8192;

// Per-topic buffer of the in-process memory bus
pub const MEMORY_BUS_CAPACITY: usize = 1024;
