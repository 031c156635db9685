//! In-memory collaborators and fixtures for exercising the decision core
//! without a live cluster.

pub mod fakes;
pub mod test_data_factory;

pub use fakes::{
    FailureInjector, FakeClaimControl, FakeClusterStore, FakeGroupControl, FakeMembershipClient,
    FakePodControl,
};
