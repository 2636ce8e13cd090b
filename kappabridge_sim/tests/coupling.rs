//! End-to-end coupling runs against the built-in engine.

use approx::assert_relative_eq;
use kappabridge_core::{
    CompartmentId, Coupling, CouplingConfig, CouplingError, UnitConversion, MOLECULES_PER_UM3_MM,
};
use kappabridge_env::{
    BackendErrorKind, EngineGateway, InstanceSpec, RpcGateway, StochasticInstance, TimeUnit,
};
use kappabridge_sim::{
    dendrite, run_coupled, spawn_server, write_model, FixedStepEngine, SimError, SimGateway,
    AB_MODEL, REGION, SPECIES,
};
use std::path::Path;
use std::sync::Arc;

fn ab_config(seed: u64) -> CouplingConfig {
    let path = write_model(AB_MODEL, "it").unwrap();
    CouplingConfig::new(REGION, &path, UnitConversion::molar())
        .unwrap()
        .with_species(SPECIES)
        .with_seed(seed)
        .with_time_unit(TimeUnit::Milliseconds)
}

#[test]
fn test_three_compartments_track_their_instances() {
    let gateway = SimGateway::shared(11);
    let run = run_coupled(
        Arc::clone(&gateway),
        ab_config(11),
        dendrite(3).unwrap(),
        1.0,
        100.0,
        "AB",
    )
    .unwrap();

    assert_eq!(run.steps, 100);
    assert_eq!(run.observations.len(), 3);
    assert_eq!(gateway.live_instances(), 0);

    for obs in &run.observations {
        let trace = run.traces.trace("AB", &obs.compartment).unwrap();
        assert_eq!(trace.samples.len(), 101);
        assert!(trace.is_non_decreasing());
        assert_relative_eq!(obs.clock, 100.0);
        assert_relative_eq!(
            obs.field_value,
            obs.count / (obs.volume * MOLECULES_PER_UM3_MM),
            max_relative = 1e-12
        );
    }
    assert_eq!(run.stats.steps, 100);
    assert_eq!(run.stats.writes, 101 * 3 * 3);
}

#[test]
fn test_chunked_advance_matches_single_advance() {
    let path = write_model(AB_MODEL, "chunk").unwrap();
    let spec = InstanceSpec::new(TimeUnit::Milliseconds);

    let mut chunked = SimGateway::new(5).create_instance(&spec).unwrap();
    let mut single = SimGateway::new(5).create_instance(&spec).unwrap();
    for sim in [&mut chunked, &mut single] {
        sim.load_definition(&path).unwrap();
        sim.initialize().unwrap();
    }

    for _ in 0..40 {
        chunked.advance(0.5, false).unwrap();
    }
    single.advance(20.0, false).unwrap();

    assert_relative_eq!(chunked.current_time().unwrap(), single.current_time().unwrap());
    for name in SPECIES {
        assert_eq!(chunked.observe(name).unwrap(), single.observe(name).unwrap());
    }
}

#[test]
fn test_missing_definition_names_the_path() {
    let gateway = SimGateway::shared(1);
    let missing = Path::new("/nonexistent/kappabridge/model.ka");
    let config = CouplingConfig::new(REGION, missing, UnitConversion::molar())
        .unwrap()
        .with_species(["A"]);

    let mut engine = FixedStepEngine::new(dendrite(2).unwrap(), 1.0).unwrap();
    let (coupling, mut registration) =
        Coupling::attach(Arc::clone(&gateway), config, engine.supervisor()).unwrap();

    match engine.finitialize() {
        Err(SimError::Coupling(CouplingError::DefinitionLoad { path, kind, .. })) => {
            assert_eq!(path, missing);
            assert_eq!(kind, BackendErrorKind::Io);
        }
        other => panic!("unexpected {:?}", other),
    }
    assert_eq!(gateway.live_instances(), 0);

    assert!(registration.unregister(engine.supervisor()));
    coupling.teardown().unwrap();
}

#[test]
fn test_unregistered_coupling_stops_advancing() {
    let gateway = SimGateway::shared(3);
    let mut engine = FixedStepEngine::new(dendrite(2).unwrap(), 1.0).unwrap();
    let (coupling, mut registration) =
        Coupling::attach(Arc::clone(&gateway), ab_config(3), engine.supervisor()).unwrap();

    engine.finitialize().unwrap();
    engine.continuerun(5.0).unwrap();
    assert!(registration.unregister(engine.supervisor()));
    assert!(!registration.unregister(engine.supervisor()));
    engine.continuerun(10.0).unwrap();

    assert_eq!(engine.steps(), 10);
    assert_eq!(coupling.stats().unwrap().steps, 5);
    let clock = coupling
        .with_driver(|driver| {
            driver
                .registry()
                .map(|r| r.current_time(&CompartmentId::new("dend", 1)))
        })
        .unwrap()
        .unwrap()
        .unwrap();
    assert_relative_eq!(clock, 5.0);

    coupling.teardown().unwrap();
    assert_eq!(gateway.live_instances(), 0);
}

#[test]
fn test_remote_gateway_reproduces_local_run() {
    let server = spawn_server("127.0.0.1:0", SimGateway::shared(21)).unwrap();
    let remote = Arc::new(RpcGateway::connect(&server.addr().to_string()).unwrap());

    let remote_run =
        run_coupled(remote, ab_config(21), dendrite(2).unwrap(), 1.0, 20.0, "AB").unwrap();
    let local_run = run_coupled(
        SimGateway::shared(21),
        ab_config(21),
        dendrite(2).unwrap(),
        1.0,
        20.0,
        "AB",
    )
    .unwrap();

    let counts = |run: &kappabridge_sim::CoupledRun| {
        run.observations.iter().map(|o| o.count).collect::<Vec<_>>()
    };
    assert_eq!(counts(&remote_run), counts(&local_run));
    server.shutdown().unwrap();
}
