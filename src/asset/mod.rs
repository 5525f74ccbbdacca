pub mod fixed;
pub mod model;

pub use fixed::{ONE, fixed_div, fixed_mul};
pub use model::{Asset, AssetError, AssetType, Price};
