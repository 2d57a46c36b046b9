use std::net::Ipv4Addr;

/// Address answered for "listed" in aggregate and custom-RBL responses.
pub const LISTED_SENTINEL: Ipv4Addr = Ipv4Addr::new(127, 0, 0, 2);

/// TTLs for synthesized and classified answers, in seconds.
pub const AGGREGATE_TTL: u32 = 300;
pub const CUSTOM_TTL: u32 = 3600;
pub const NOT_LISTED_TTL: u32 = 3600;
pub const ERROR_TTL: u32 = 300;
/// Used when an upstream answer carries no usable TTL.
pub const DEFAULT_LISTED_TTL: u32 = 3600;

/// UDP responses larger than this are truncated with TC=1.
pub const MAX_UDP_RESPONSE_SIZE: usize = 512;

/// Per-RBL TXT listing records in one aggregate answer; the rest collapse
/// into an overflow record so the answer fits UDP.
pub const AGGREGATE_TXT_LIST_CAP: usize = 5;
