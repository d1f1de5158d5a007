pub mod audit;
pub mod config;
pub mod extract;
pub mod harvest;
pub mod normalize;
pub mod notify;
pub mod paginate;
pub mod paths;
pub mod pricing;
pub mod run;
pub mod state;
pub mod util;
