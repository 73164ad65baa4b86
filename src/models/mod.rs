// Domain and request/response models
pub mod apple;
pub mod common;
pub mod google;
pub mod iap;
pub mod notification;
pub mod purchase;
pub mod target;
