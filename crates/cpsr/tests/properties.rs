use std::cell::Cell;
use std::time::{Duration, Instant};

use cpsr::{
    AuthoritativeEntity, AuthoritativeServer, FixedFrequencyLoop, FixedFrequencyProcessor,
    FixedFrequencyReprocessor, InputSnapshot, InputSource, LoopbackServer, ManualClock,
    MotionModel, PacketLossSimulation, PeriodicSignal, PredictingClient, ScriptedInput,
    SimulationConfig, TickId, TickMode, TickSimulation,
};

#[derive(Default)]
struct Recorder {
    calls: Vec<(TickId, TickMode)>,
}

impl TickSimulation for Recorder {
    fn process(&mut self, id: TickId, _input: InputSnapshot, _dt: f64, mode: TickMode) {
        self.calls.push((id, mode));
    }
}

fn script() -> ScriptedInput {
    "forward:4,forward+right:6,idle:3,left:5,backward+left:2"
        .parse()
        .unwrap()
}

#[test]
fn replay_reproduces_the_live_run() {
    let mut reprocessor = FixedFrequencyReprocessor::new(60, 256);
    let mut live = AuthoritativeEntity::new(MotionModel::default());
    let mut inputs = script();
    let start = Instant::now();
    let period = reprocessor.period();

    reprocessor.attempt_to_process_at(start, &mut live);
    for k in 1..=20 {
        reprocessor.record_input(inputs.poll());
        reprocessor.attempt_to_process_at(start + period * k, &mut live);
    }
    assert_eq!(reprocessor.last_processed_id(), Some(19));

    let mut replayed = AuthoritativeEntity::new(MotionModel::default());
    let first = reprocessor.history().get(0).unwrap();
    replayed.process(0, first, reprocessor.dt(), TickMode::Live);

    let report = reprocessor.re_process_after_id(0, &mut replayed);
    assert_eq!(report.replayed, 19);
    assert_eq!(report.missing, 0);
    assert_eq!(replayed.state(), live.state());
}

#[test]
fn out_of_order_recording_still_runs_ascending() {
    let mut reprocessor = FixedFrequencyReprocessor::new(60, 64);
    let mut sim = Recorder::default();
    let start = Instant::now();

    reprocessor.attempt_to_process_at(start, &mut sim);
    for id in [3, 1, 2, 0] {
        assert!(reprocessor.record_input_at(id, InputSnapshot::IDLE));
    }
    assert!(reprocessor.attempt_to_process_at(start + reprocessor.period(), &mut sim));

    let live: Vec<TickId> = sim.calls.drain(..).map(|(id, _)| id).collect();
    assert_eq!(live, vec![0, 1, 2, 3]);

    reprocessor.re_process_after_id(0, &mut sim);
    assert_eq!(
        sim.calls,
        vec![(1, TickMode::Replay), (2, TickMode::Replay), (3, TickMode::Replay)]
    );
}

#[test]
fn send_signal_spacing_at_60_hz_on_a_512_hz_loop() {
    let mut signal = PeriodicSignal::new(60, 512);
    let fired: Vec<usize> = (0..5120)
        .filter(|_| signal.process_and_get_signal())
        .collect();

    assert!((599..=600).contains(&fired.len()), "fired {}", fired.len());
    for pair in fired.windows(2) {
        let gap = pair[1] - pair[0];
        assert!((8..=9).contains(&gap), "gap {}", gap);
    }
}

#[test]
fn fixed_loop_drives_the_send_signal_at_its_rate() {
    let mut fixed_loop = FixedFrequencyLoop::with_clock(ManualClock::default());
    let mut signal = PeriodicSignal::new(60, 512);
    let ticks = Cell::new(0u32);
    let mut fires = 0u32;

    let stats = fixed_loop
        .start(
            512,
            |_| {
                ticks.set(ticks.get() + 1);
                if signal.process_and_get_signal() {
                    fires += 1;
                }
                Ok::<(), ()>(())
            },
            || ticks.get() >= 512,
        )
        .unwrap();

    assert_eq!(stats.ticks, 512);
    assert!((59..=60).contains(&fires), "fired {}", fires);
}

#[test]
fn ticks_without_input_leave_state_untouched() {
    let mut processor = FixedFrequencyProcessor::new(60);
    let mut entity = AuthoritativeEntity::new(MotionModel::default());
    let start = Instant::now();
    let period = processor.period();

    processor.attempt_to_process_at(start, &mut entity);
    processor.receive(0, InputSnapshot::new(true, false, false, true));
    assert!(processor.attempt_to_process_at(start + period, &mut entity));
    let after_input = entity.state();

    for k in 2..20 {
        assert!(processor.attempt_to_process_at(start + period * k, &mut entity));
    }

    assert_eq!(entity.state(), after_input);
    assert_eq!(entity.ticks_processed(), 1);
    assert_eq!(processor.last_processed_id(), Some(0));
}

#[test]
fn lossy_snapshots_never_cause_corrections_with_matching_motion() {
    let config = SimulationConfig {
        tick_rate: 60,
        loop_rate: 60,
        send_rate: 60,
        ..SimulationConfig::default()
    };
    let channel = LoopbackServer::with_loss(PacketLossSimulation::new(50.0), 42);
    let mut client = PredictingClient::new(channel.client(), config);
    let mut server = AuthoritativeServer::new(channel, config);
    let mut inputs = script();
    let start = Instant::now();
    let period = Duration::from_nanos(1_000_000_000 / 60);

    client.connect();
    for k in 0..300 {
        let now = start + period * k;
        client.tick_at(now, inputs.poll());
        server.tick_at(now);
    }

    let corrections = client.reconciler().corrections();
    assert!(corrections > 0);
    assert!(corrections < server.stats().snapshots_sent);
    assert_eq!(client.world().predicted(), client.world().unreconciled());
    assert!(client.last_correction().is_some_and(|c| c.magnitude() == 0.0));
}
