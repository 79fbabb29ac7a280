#![deny(unused_variables)]
#![deny(dead_code)]
#![deny(unused_imports)]
pub mod blocks;
pub mod data;
pub mod estimate;
pub mod link;
pub mod mle;
pub mod model;
pub mod one_step;
pub mod probit;
pub mod synthetic;
pub mod types;
