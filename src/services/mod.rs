//! Service layer for the coupon crawler.
//!
//! This module contains the business logic for:
//! - Coupon validation against the marketplace (`CouponValidator`)
//! - Coupon URL discovery from listing sites (`CouponSource`)

pub mod sources;
mod validator;

pub use sources::{CouponSource, EnextSource, RealDiscountSource};
pub use validator::{CouponValidator, UNRESOLVED_COURSE_ID, Validation};

#[cfg(test)]
pub(crate) use validator::fixtures;
