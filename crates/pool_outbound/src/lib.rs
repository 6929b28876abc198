mod outbound;

pub use outbound::{proxy_url, Outbound};
