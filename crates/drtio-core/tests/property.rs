use drtio_core::{BridgeKind, Cri, IoEvent, PhaseModel, Testbench, TestbenchConfig};
use proptest::prelude::*;

proptest! {
    #![proptest_config(ProptestConfig::with_cases(8))]

    /// Writes reach the satellite in order whatever the clock phases.
    #[test]
    fn writes_preserve_order_under_random_phase(
        seed in any::<u64>(),
        elastic in any::<bool>(),
        data in proptest::collection::vec(any::<u32>(), 1..24),
    ) {
        let config = TestbenchConfig {
            phase: PhaseModel::Random { seed },
            bridge: if elastic { BridgeKind::Elastic } else { BridgeKind::Fixed { delay: 1 } },
            ..TestbenchConfig::default()
        };
        let mut tb = Testbench::new(&config).unwrap();
        tb.wait_link_ready().unwrap();

        for (i, &value) in data.iter().enumerate() {
            tb.submit_output(9, i as u64, value).unwrap();
        }
        tb.run(100 + 40 * data.len() as u64).unwrap();

        let got: Vec<IoEvent> =
            std::iter::from_fn(|| tb.satellite_mut().ios_mut().pop_output(9)).collect();
        let got: Vec<u32> = got.iter().map(|e| e.data).collect();
        prop_assert_eq!(got, data);

        let echo = tb.echo().unwrap();
        prop_assert!(echo.rtt <= 2 * tb.master().manager().echo_timeout());
    }
}
