pub mod constants;
pub mod fix;
pub mod calibration;
pub mod interpolate;
pub mod mapper;
pub mod net;
pub mod feed;
pub mod http;
pub mod config;
pub mod logging;
