use criterion::{black_box, criterion_group, criterion_main, Criterion};
use dasp_graph::Buffer;
use rtrb::{Producer, RingBuffer};
use sidetone::analysis;
use sidetone::nodes::{CaptureSource, Gain, GainMessage};
use sidetone::settings::{FFT_SIZE, FREQUENCY_BIN_COUNT};
use sidetone::AudioGraph;

fn feed_tone(tx: &mut Producer<f32>, phase: &mut f32) {
    for _ in 0..Buffer::LEN {
        let _ = tx.push(phase.sin() * 0.5);
        *phase += 0.0576;
    }
}

pub fn criterion_benchmark(c: &mut Criterion) {
    c.bench_function("capture -> gain block (ramping)", |b| {
        let (mut tx, rx) = RingBuffer::new(8192);
        let mut graph = AudioGraph::new(48_000);
        let source = graph.add(CaptureSource::new(rx, 44_100).with_cushion(128));
        let mut gain = graph.add(Gain::new(0.0).with_ramp(0.1, 48_000));
        graph.connect(&source, &gain);
        graph.set_terminal(&gain);

        let mut phase = 0.0;
        let mut target = 0.0;
        b.iter(move || {
            feed_tone(&mut tx, &mut phase);
            target = if target == 0.0 { 2.0 } else { 0.0 };
            let _ = gain.send(GainMessage::SetGain(target));
            graph.process();
        })
    });

    c.bench_function("analysis tap + byte reads", |b| {
        let (mut tx, rx) = RingBuffer::new(8192);
        let (tap, mut analyser) = analysis::default_tap();
        let mut graph = AudioGraph::new(48_000);
        let source = graph.add(CaptureSource::new(rx, 48_000).with_cushion(2));
        let tap = graph.add(tap);
        graph.connect(&source, &tap);
        graph.set_terminal(&tap);

        let mut phase = 0.0;
        let mut time = vec![0u8; FFT_SIZE];
        let mut freq = vec![0u8; FREQUENCY_BIN_COUNT];
        b.iter(move || {
            feed_tone(&mut tx, &mut phase);
            graph.process();
            analyser.time_domain_into(&mut time);
            analyser.frequency_into(&mut freq);
            black_box(&freq);
        })
    });
}

criterion_group!(benches, criterion_benchmark);
criterion_main!(benches);
