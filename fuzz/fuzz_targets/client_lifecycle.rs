//! Arbitrary lifecycle sequences keep the client machine in step with the
//! reference model.

#![no_main]

use libfuzzer_sys::fuzz_target;
use rebound_core::{ClientConnection, ReconnectConfig};
use rebound_harness::{ClientModel, Operation, Outcome};

fuzz_target!(|input: (bool, Vec<Operation>)| {
    let (suppress, ops) = input;
    let config = ReconnectConfig { suppress_duplicate_sessions: suppress, ..ReconnectConfig::default() };
    let mut model = ClientModel::new(&config);
    let mut conn = ClientConnection::new(config);

    for op in &ops {
        let expected = model.apply(op);
        let actual = Outcome::from_actions(&op.apply_to(&mut conn));
        assert_eq!(actual, expected, "diverged on {op:?}");
        assert_eq!(conn.state(), model.state());
    }
});
