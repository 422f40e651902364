//! Views shipped with Cairn.

mod count;
mod latest;

pub use count::CountView;
pub use latest::LatestView;
