use super::*;

mod support;
use support::*;

mod binding;
mod correlation;
