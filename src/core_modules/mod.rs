pub mod chunk;
pub mod comparator;
pub mod frame;
pub mod ledger;
pub mod percent;
pub mod pixel;
pub mod policy;
pub mod region;
pub mod utils;
