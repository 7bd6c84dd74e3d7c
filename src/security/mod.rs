pub mod policy;
pub mod query_guards;
pub mod scope;

pub use policy::*;
pub use query_guards::*;
pub use scope::*;
