pub mod backends;
pub mod run;
