pub mod rls;
pub mod space;
