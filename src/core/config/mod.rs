pub mod data;
pub mod io;

pub use data::{
    Config, DiscoveryConfig, HeaderPair, ResumeConfig, StreamRegistryBackend,
    StreamRegistryConfig, ToolEndpointConfig,
};
pub use io::ConfigError;
