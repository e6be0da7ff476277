//! Domain types shared by every module.

pub mod account;

pub use account::{
    Account, AccountIndex, AccountSummary, DeviceProfile, DeviceProfileVersion, QuotaData,
    QuotaModel, TokenData,
};
