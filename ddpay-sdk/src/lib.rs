//! Wire types shared between the DDPay gateway and its callers.

#![forbid(unsafe_code)]

pub mod objects;
