pub mod call;
pub mod campaign;
pub mod contact;
pub mod trunk;

pub use call::*;
pub use campaign::*;
pub use contact::*;
pub use trunk::*;
