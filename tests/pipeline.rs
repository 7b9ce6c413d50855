mod common;

use common::{encode_frames, noise, to_symbols, transmit, transport_packets, WhitenedDecoder};
use dvbs::framing::{PACKETS_PER_GROUP, TS_PACKET_LEN};
use dvbs::pipeline::{decode_symbols, Pipeline, PipelineOpts, PipelineStats, WriterSink};
use dvbs::rotation::Rotation;

const GROUP_LEN: usize = PACKETS_PER_GROUP * TS_PACKET_LEN;

// Of 4 transmitted groups, 11 codewords remain in the deinterleaver and 1 more is waiting on
// the following sync byte, leaving 2 whole groups.
const GROUPS_SENT: usize = 4;
const GROUPS_RECEIVED: usize = 2;

fn channel(tx: &[u8], rotation: usize) -> Vec<num_complex::Complex32> {
    let mut soft = encode_frames(tx, 254, 0);
    if let Some(rotation) = Rotation::new(rotation) {
        rotation.unapply(&mut soft);
    }
    to_symbols(&soft)
}

#[test]
fn recovers_transport_packets() {
    let packets = transport_packets(GROUPS_SENT);
    let symbols = channel(&transmit(&packets, |_, _| {}), 0);

    let opts = PipelineOpts::builder().num_threads(2).build();
    let mut pipeline = Pipeline::new(opts, || WhitenedDecoder, Vec::<u8>::new()).unwrap();
    for chunk in symbols.chunks(4096) {
        pipeline.put_symbols(chunk).unwrap();
    }

    let stats = pipeline.stats();
    assert_eq!(stats.frames, GROUPS_SENT as u64);
    assert_eq!(stats.groups, GROUPS_RECEIVED as u64);
    assert_eq!(stats.packets, (GROUPS_RECEIVED * PACKETS_PER_GROUP) as u64);
    assert_eq!(stats.corrected_symbols, 0);
    assert_eq!(stats.uncorrectable_codewords, 0);
    assert_eq!(stats.dropped_codewords, 0);
    assert_eq!(stats.lock_acquisitions, 1);
    assert_eq!(stats.lock_losses, 0);
    assert_eq!(stats.misaligned_frames, 0);

    let output = pipeline.into_sink();
    assert_eq!(output.len(), GROUPS_RECEIVED * GROUP_LEN);
    assert_eq!(output, packets[..output.len()]);
}

#[test]
fn corrects_codeword_errors() {
    let packets = transport_packets(GROUPS_SENT);
    let tx = transmit(&packets, |idx, cw| {
        if idx == 2 {
            for offset in [10, 50, 100] {
                cw[offset] ^= 0xff;
            }
        }
    });

    let mut pipeline =
        Pipeline::new(PipelineOpts::default(), || WhitenedDecoder, Vec::<u8>::new()).unwrap();
    pipeline.put_symbols(&channel(&tx, 0)).unwrap();

    assert_eq!(pipeline.stats().corrected_symbols, 3);
    assert_eq!(pipeline.stats().uncorrectable_codewords, 0);
    let output = pipeline.into_sink();
    assert_eq!(output, packets[..GROUPS_RECEIVED * GROUP_LEN]);
}

#[test]
fn uncorrectable_codewords_are_forwarded() {
    let packets = transport_packets(GROUPS_SENT);
    let tx = transmit(&packets, |idx, cw| {
        if idx == 9 {
            for b in cw.iter_mut().skip(1).take(30) {
                *b ^= 0x55;
            }
        }
    });

    let mut pipeline =
        Pipeline::new(PipelineOpts::default(), || WhitenedDecoder, Vec::<u8>::new()).unwrap();
    pipeline.put_symbols(&channel(&tx, 0)).unwrap();

    assert_eq!(pipeline.stats().uncorrectable_codewords, 1);
    let output = pipeline.into_sink();
    assert_eq!(output.len(), GROUPS_RECEIVED * GROUP_LEN);
    // everything but the damaged packet comes through intact
    let damaged = 9 * TS_PACKET_LEN..10 * TS_PACKET_LEN;
    assert_ne!(output[damaged.clone()], packets[damaged.clone()]);
    assert_eq!(output[..damaged.start], packets[..damaged.start]);
    assert_eq!(output[damaged.end..], packets[damaged.end..output.len()]);
}

#[test]
fn tolerates_sync_byte_bit_errors() {
    // 6 groups leave 36 confirmed codewords, 4 whole groups
    let packets = transport_packets(6);
    let tx = transmit(&packets, |idx, cw| {
        if idx == 3 {
            cw[0] ^= 0x01;
        }
    });

    let mut pipeline =
        Pipeline::new(PipelineOpts::default(), || WhitenedDecoder, Vec::<u8>::new()).unwrap();
    pipeline.put_symbols(&channel(&tx, 0)).unwrap();

    let stats = pipeline.stats();
    assert_eq!(stats.misaligned_frames, 0);
    assert_eq!(stats.dropped_codewords, 0);
    assert_eq!(stats.corrected_symbols, 1);
    assert_eq!(stats.groups, 4);
    assert_eq!(pipeline.into_sink(), packets[..4 * GROUP_LEN]);
}

#[test]
fn discards_groups_broken_by_lost_alignment() {
    let packets = transport_packets(8);
    let tx = transmit(&packets, |idx, cw| {
        if idx == 3 {
            cw[0] = 0x00;
        }
    });

    let mut pipeline =
        Pipeline::new(PipelineOpts::default(), || WhitenedDecoder, Vec::<u8>::new()).unwrap();
    for chunk in channel(&tx, 0).chunks(4096) {
        pipeline.put_symbols(chunk).unwrap();
    }

    let stats = pipeline.stats();
    assert_eq!(stats.lock_losses, 0);
    assert!(stats.misaligned_frames >= 1, "{stats:?}");
    assert!(stats.dropped_codewords >= 2, "{stats:?}");
    assert!(stats.groups >= 1, "{stats:?}");

    let output = pipeline.into_sink();
    assert_eq!(output.len() as u64, stats.groups * GROUP_LEN as u64);
    let sent: Vec<&[u8]> = packets.chunks(GROUP_LEN).collect();
    let delivered: Vec<usize> = output
        .chunks(GROUP_LEN)
        .map(|group| {
            sent.iter()
                .position(|g| *g == group)
                .expect("delivered group was never sent")
        })
        .collect();
    // the group holding the damaged codeword never makes it out
    assert!(!delivered.contains(&0), "{delivered:?}");
    assert!(delivered.windows(2).all(|w| w[0] < w[1]), "{delivered:?}");
}

#[test]
fn reacquires_after_lock_loss() {
    let first = transport_packets(GROUPS_SENT);
    let second = transport_packets(GROUPS_SENT);
    let mut soft = encode_frames(&transmit(&first, |_, _| {}), 254, 0);
    soft.extend(noise(1002, 254, 0));
    soft.extend(encode_frames(&transmit(&second, |_, _| {}), 254, 0));

    let mut pipeline =
        Pipeline::new(PipelineOpts::default(), || WhitenedDecoder, Vec::<u8>::new()).unwrap();
    for chunk in to_symbols(&soft).chunks(4096) {
        pipeline.put_symbols(chunk).unwrap();
    }

    let stats = pipeline.stats();
    assert_eq!(stats.lock_acquisitions, 2);
    assert_eq!(stats.lock_losses, 1);
    assert_eq!(stats.frames, 2 * GROUPS_SENT as u64);
    // the partial group pending when lock was lost
    assert_eq!(stats.dropped_codewords, 4);
    assert_eq!(stats.groups, 2 * GROUPS_RECEIVED as u64);

    let output = pipeline.into_sink();
    let mut expected = first[..GROUPS_RECEIVED * GROUP_LEN].to_vec();
    expected.extend_from_slice(&second[..GROUPS_RECEIVED * GROUP_LEN]);
    assert_eq!(output, expected);
}

#[test]
fn recovers_rotated_channel() {
    let packets = transport_packets(GROUPS_SENT);
    let symbols = channel(&transmit(&packets, |_, _| {}), 5);

    let mut pipeline =
        Pipeline::new(PipelineOpts::default(), || WhitenedDecoder, Vec::<u8>::new()).unwrap();
    pipeline.put_symbols(&symbols).unwrap();

    assert_eq!(
        pipeline.synchronizer().lock_state().hypothesis,
        Rotation::new(5)
    );
    assert_eq!(pipeline.into_sink(), packets[..GROUPS_RECEIVED * GROUP_LEN]);
}

#[test]
fn without_descrambling() {
    let packets = transport_packets(GROUPS_SENT);
    let symbols = channel(&transmit(&packets, |_, _| {}), 0);

    let opts = PipelineOpts::builder().descramble(false).build();
    let mut pipeline = Pipeline::new(opts, || WhitenedDecoder, Vec::<u8>::new()).unwrap();
    pipeline.put_symbols(&symbols).unwrap();

    let output = pipeline.into_sink();
    assert_eq!(output.len(), GROUPS_RECEIVED * GROUP_LEN);
    assert_eq!(output[0], dvbs::framing::TS_SYNC_INVERTED);
    assert_ne!(output, packets[..output.len()]);
}

#[test]
fn writes_to_file() {
    let packets = transport_packets(GROUPS_SENT);
    let symbols = channel(&transmit(&packets, |_, _| {}), 0);
    let file = tempfile::NamedTempFile::new().unwrap();

    let sink = WriterSink::new(file.reopen().unwrap());
    let mut pipeline = Pipeline::new(PipelineOpts::default(), || WhitenedDecoder, sink).unwrap();
    pipeline.put_symbols(&symbols).unwrap();
    pipeline.into_sink().into_inner().unwrap();

    let written = std::fs::read(file.path()).unwrap();
    assert_eq!(written, packets[..GROUPS_RECEIVED * GROUP_LEN]);
}

#[test]
fn streams_groups_from_background_thread() {
    let packets = transport_packets(GROUPS_SENT);
    let symbols = channel(&transmit(&packets, |_, _| {}), 0);
    let chunks: Vec<_> = symbols.chunks(3000).map(<[_]>::to_vec).collect();

    let opts = PipelineOpts::builder().buffer_size(1).build();
    let groups: Vec<Vec<u8>> = decode_symbols(chunks, opts, || WhitenedDecoder)
        .unwrap()
        .collect();

    assert_eq!(groups.len(), GROUPS_RECEIVED);
    for (idx, group) in groups.iter().enumerate() {
        assert_eq!(group[..], packets[idx * GROUP_LEN..(idx + 1) * GROUP_LEN]);
    }
}

#[test]
fn stats_serialize() {
    let stats = PipelineStats {
        packets: 16,
        groups: 2,
        corrected_symbols: 3,
        ..Default::default()
    };

    let json = serde_json::to_string(&stats).unwrap();
    assert!(json.contains("\"corrected_symbols\":3"), "{json}");
    let zult: PipelineStats = serde_json::from_str(&json).unwrap();
    assert_eq!(zult, stats);
}

#[test]
fn opts_deserialize() {
    let opts: PipelineOpts = serde_json::from_str(
        r#"{
            "group_size": 8,
            "interleave_branches": 12,
            "interleave_depth": 17,
            "resync": false,
            "descramble": true,
            "num_threads": 4,
            "buffer_size": 16
        }"#,
    )
    .unwrap();

    assert_eq!(
        opts,
        PipelineOpts::builder()
            .resync(false)
            .num_threads(4)
            .buffer_size(16)
            .build()
    );
}
