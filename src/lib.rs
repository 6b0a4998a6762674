pub mod config;
pub mod decision;
pub mod detected_points;
pub mod error;
pub mod http;
pub mod io;
pub mod matcher;
pub mod optimization;
pub mod pipeline;
pub mod reference;
pub mod service;
pub mod sift;
pub mod util;
