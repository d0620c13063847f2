pub mod admin;
pub mod dispatcher;
pub mod probe;
pub mod selector;

pub use dispatcher::{dispatch, Dispatch, MAX_DISPATCH_ATTEMPTS};
pub use probe::{build_probe_client, probe_upstream, run_probe_round};
pub use selector::select;
