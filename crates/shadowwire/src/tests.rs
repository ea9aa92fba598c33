use crate::*;

use rand::rngs::StdRng;
use rand::Rng;
use rand::SeedableRng;
use shadowpack::Encoder;

fn sample_args() -> Vec<TypedValue> {
    vec![
        TypedValue::Object(NetReference::new(5, 2, false)),
        TypedValue::Int(-7),
        TypedValue::Str("add".into()),
        TypedValue::Double(0.5),
    ]
}

fn sample_messages() -> Vec<Message> {
    vec![
        Message::RegisterMethod { id: MethodId(1), name: "X.onAdd".into() },
        Message::ClassInfo(ClassInfo {
            class: NetReference::new(3, 1, true),
            signature: "Ljava/util/ArrayList;".into(),
            generic: "".into(),
            loader: NetReference::NULL,
            super_class: NetReference::new(2, 1, true),
        }),
        Message::StringInfo { object: NetReference::new(8, 4, false), value: "hello".into() },
        Message::ThreadInfo(ThreadInfo {
            thread: NetReference::new(9, 5, false),
            name: "main".into(),
            daemon: false,
        }),
        Message::Analyze {
            ordering_id: 256,
            records: vec![
                EventRecord::new(MethodId(1), sample_args()),
                EventRecord::new(MethodId(1), vec![]),
            ],
        },
        Message::ObjectFree(vec![NetReference::new(5, 2, false), NetReference::new(6, 2, false)]),
        Message::ThreadEnd { ordering_id: 256 },
        Message::Close,
    ]
}

fn stream(messages: &[Message]) -> Result<Vec<u8>> {
    let mut enc = Encoder::new();
    for m in messages {
        m.encode(&mut enc)?;
    }
    Ok(enc.into_bytes())
}

fn drain(reader: &mut FrameReader) -> Result<Vec<Message>> {
    let mut out = Vec::new();
    while let Some(frame) = reader.next_frame()? {
        out.push(frame.message);
    }
    Ok(out)
}

// ============================================================================
//  RECORDS
// ============================================================================

#[test]
fn test_record_roundtrip() -> Result<()> {
    let mut enc = Encoder::new();
    encode_record(&mut enc, MethodId(3), &sample_args())?;
    let bytes = enc.into_bytes();

    // [id u16][argc u8]
    assert_eq!(&bytes[..3], &[3, 0, 4]);

    let record = decode_record(&bytes)?;
    assert_eq!(record.method, MethodId(3));
    assert_eq!(record.argc(), 4);
    assert_eq!(record.args, sample_args());
    Ok(())
}

#[test]
fn test_record_with_no_args() -> Result<()> {
    let mut enc = Encoder::new();
    EventRecord::new(MethodId(9), vec![]).encode(&mut enc)?;
    assert_eq!(enc.as_bytes(), &[9, 0, 0]);
    assert_eq!(decode_record(enc.as_bytes())?.argc(), 0);
    Ok(())
}

#[test]
fn test_too_many_args_writes_nothing() {
    let args = vec![TypedValue::Bool(true); MAX_ARGS + 1];
    let mut enc = Encoder::new();
    enc.raw_u8(0xAA);

    assert_eq!(
        encode_record(&mut enc, MethodId(1), &args),
        Err(ProtocolError::TooManyArgs(256))
    );
    assert_eq!(enc.as_bytes(), &[0xAA]);
}

#[test]
fn test_record_builder_matches_encode() -> Result<()> {
    let mut builder = RecordBuilder::new(MethodId(3));
    builder.object(NetReference::new(5, 2, false));
    builder.int(-7);
    builder.str("add")?;
    builder.double(0.5);
    assert_eq!(builder.argc(), 4);

    let expected_len = builder.encoded_len();
    let mut streamed = Encoder::new();
    builder.finish(&mut streamed)?;
    assert_eq!(streamed.len(), expected_len);

    let mut direct = Encoder::new();
    encode_record(&mut direct, MethodId(3), &sample_args())?;
    assert_eq!(streamed.as_bytes(), direct.as_bytes());
    Ok(())
}

#[test]
fn test_record_declaring_more_args_than_present() -> Result<()> {
    let mut enc = Encoder::new();
    encode_record(&mut enc, MethodId(1), &[TypedValue::Int(1)])?;
    let mut bytes = enc.into_bytes();
    bytes[2] = 2;

    assert_eq!(decode_record(&bytes), Err(ProtocolError::Truncated { needed: 1, available: 0 }));
    Ok(())
}

#[test]
fn test_record_with_trailing_value() -> Result<()> {
    let mut enc = Encoder::new();
    encode_record(&mut enc, MethodId(1), &[TypedValue::Int(1)])?;
    enc.int(2);

    assert_eq!(decode_record(enc.as_bytes()), Err(ProtocolError::TrailingBytes(5)));
    Ok(())
}

#[test]
fn test_record_truncated_inside_string() -> Result<()> {
    let mut enc = Encoder::new();
    encode_record(&mut enc, MethodId(1), &[TypedValue::Str("abcdef".into())])?;
    let bytes = enc.as_bytes();
    let cut = &bytes[..bytes.len() - 2];

    assert_eq!(decode_record(cut), Err(ProtocolError::Truncated { needed: 6, available: 4 }));
    Ok(())
}

// ============================================================================
//  FRAMES
// ============================================================================

#[test]
fn test_every_message_roundtrips() -> Result<()> {
    for msg in sample_messages() {
        let bytes = msg.to_bytes()?;
        assert_eq!(bytes[0], msg.kind() as u8);

        let body_len = u32::from_le_bytes([bytes[1], bytes[2], bytes[3], bytes[4]]) as usize;
        assert_eq!(body_len, bytes.len() - FRAME_HEADER_LEN);

        let decoded = Message::decode(msg.kind(), &bytes[FRAME_HEADER_LEN..])?;
        assert_eq!(decoded, msg);
    }
    Ok(())
}

#[test]
fn test_close_has_empty_body() -> Result<()> {
    assert_eq!(Message::Close.to_bytes()?, vec![0, 0, 0, 0, 0]);
    Ok(())
}

#[test]
fn test_unknown_kind() {
    assert_eq!(MessageKind::from_u8(8), Err(ProtocolError::UnknownMessage(8)));
    assert_eq!(MessageKind::from_u8(0xFF), Err(ProtocolError::UnknownMessage(0xFF)));
}

#[test]
fn test_body_with_trailing_bytes() -> Result<()> {
    let mut body = Encoder::new();
    body.raw_u64(256);
    body.raw_u8(0);
    assert_eq!(
        Message::decode(MessageKind::ThreadEnd, body.as_bytes()),
        Err(ProtocolError::TrailingBytes(1))
    );
    Ok(())
}

#[test]
fn test_analyze_batch_matches_message() -> Result<()> {
    let records = vec![
        EventRecord::new(MethodId(1), sample_args()),
        EventRecord::new(MethodId(2), vec![TypedValue::Bool(false)]),
    ];

    let mut batch = AnalyzeBatch::new(300);
    assert!(batch.is_empty());
    for r in &records {
        batch.push(r)?;
    }
    assert_eq!(batch.records(), 2);
    let built = batch.finish()?;

    let expected = Message::Analyze { ordering_id: 300, records }.to_bytes()?;
    assert_eq!(built, expected);
    Ok(())
}

#[test]
fn test_analyze_batch_failed_push_is_not_counted() -> Result<()> {
    let mut batch = AnalyzeBatch::new(256);
    batch.push(&EventRecord::new(MethodId(1), vec![]))?;
    let too_many = EventRecord::new(MethodId(1), vec![TypedValue::Int(0); 300]);
    assert_eq!(batch.push(&too_many), Err(ProtocolError::TooManyArgs(300)));
    assert_eq!(batch.records(), 1);

    let bytes = batch.finish()?;
    let decoded = Message::decode(MessageKind::Analyze, &bytes[FRAME_HEADER_LEN..])?;
    let Message::Analyze { records, .. } = decoded else {
        panic!("expected an analyze frame");
    };
    assert_eq!(records.len(), 1);
    Ok(())
}

#[test]
fn test_free_batch() -> Result<()> {
    let refs = vec![NetReference::new(1, 1, false), NetReference::new(2, 1, false)];
    let mut batch = FreeBatch::new();
    for r in &refs {
        batch.push(*r)?;
    }
    assert_eq!(batch.finish()?, Message::ObjectFree(refs).to_bytes()?);
    Ok(())
}

#[test]
fn test_analyze_count_exceeds_records() -> Result<()> {
    let mut body = Encoder::new();
    body.raw_u64(256);
    body.raw_u32(2);
    encode_record(&mut body, MethodId(1), &[])?;

    assert_eq!(
        Message::decode(MessageKind::Analyze, body.as_bytes()),
        Err(ProtocolError::Truncated { needed: 2, available: 0 })
    );
    Ok(())
}

// ============================================================================
//  STREAM REASSEMBLY
// ============================================================================

#[test]
fn test_reader_whole_stream() -> Result<()> {
    let messages = sample_messages();
    let mut reader = FrameReader::new();
    reader.push(&stream(&messages)?);

    assert_eq!(drain(&mut reader)?, messages);
    assert_eq!(reader.buffered(), 0);
    reader.finish()
}

#[test]
fn test_reader_byte_at_a_time() -> Result<()> {
    let messages = sample_messages();
    let bytes = stream(&messages)?;
    let mut reader = FrameReader::new();
    let mut out = Vec::new();

    for b in bytes {
        reader.push(&[b]);
        out.extend(drain(&mut reader)?);
    }
    assert_eq!(out, messages);
    reader.finish()
}

#[test]
fn test_reader_random_chunks() -> Result<()> {
    let messages = sample_messages();
    let bytes = stream(&messages)?;
    let mut rng = StdRng::seed_from_u64(0x5EED);

    for _ in 0..50 {
        let mut reader = FrameReader::new();
        let mut out = Vec::new();
        let mut pos = 0;
        while pos < bytes.len() {
            let n = rng.gen_range(1..=17).min(bytes.len() - pos);
            reader.push(&bytes[pos..pos + n]);
            pos += n;
            out.extend(drain(&mut reader)?);
        }
        assert_eq!(out, messages);
        reader.finish()?;
    }
    Ok(())
}

#[test]
fn test_reader_reports_wire_len() -> Result<()> {
    let msg = Message::ThreadEnd { ordering_id: 7 };
    let mut reader = FrameReader::new();
    reader.push(&msg.to_bytes()?);

    let Some(frame) = reader.next_frame()? else {
        panic!("expected a complete frame");
    };
    assert_eq!(frame.wire_len, FRAME_HEADER_LEN + 8);
    Ok(())
}

#[test]
fn test_reader_truncated_at_eof() -> Result<()> {
    let bytes = Message::StringInfo { object: NetReference::new(1, 1, false), value: "abc".into() }
        .to_bytes()?;
    let mut reader = FrameReader::new();
    reader.push(&bytes[..bytes.len() - 1]);

    assert_eq!(reader.next_frame()?, None);
    assert_eq!(
        reader.finish(),
        Err(ProtocolError::Truncated { needed: bytes.len(), available: bytes.len() - 1 })
    );
    Ok(())
}

#[test]
fn test_reader_partial_header_at_eof() {
    let mut reader = FrameReader::new();
    reader.push(&[1, 0]);
    assert_eq!(reader.finish(), Err(ProtocolError::Truncated { needed: 5, available: 2 }));
}

#[test]
fn test_reader_unknown_kind_fails_immediately() {
    let mut reader = FrameReader::new();
    reader.push(&[0x42]);
    assert_eq!(reader.next_frame(), Err(ProtocolError::UnknownMessage(0x42)));
}

#[test]
fn test_reader_rejects_oversized_frame() {
    let mut reader = FrameReader::with_max_frame(16);
    reader.push(&[1, 17, 0, 0, 0]);
    assert_eq!(reader.next_frame(), Err(ProtocolError::FrameTooLarge { len: 17, max: 16 }));
}

// ============================================================================
//  RANDOMIZED ROUND TRIPS
// ============================================================================

fn random_reference(rng: &mut StdRng) -> NetReference {
    let r = NetReference::new(
        rng.gen_range(1..=NetReference::MAX_OBJECT_ID),
        rng.gen_range(0..=NetReference::MAX_CLASS_ID),
        rng.gen_bool(0.3),
    );
    if rng.gen_bool(0.5) { r.with_data() } else { r }
}

fn random_blob_len(rng: &mut StdRng) -> usize {
    match rng.gen_range(0..20) {
        0..=3 => 0,
        4 => rng.gen_range(60_000..100_000),
        _ => rng.gen_range(1..64),
    }
}

fn random_value(rng: &mut StdRng) -> TypedValue {
    match rng.gen_range(0..12) {
        0 => TypedValue::Bool(rng.r#gen()),
        1 => TypedValue::Byte(rng.r#gen()),
        2 => TypedValue::Char(rng.r#gen()),
        3 => TypedValue::Short(rng.r#gen()),
        4 => TypedValue::Int(rng.r#gen()),
        5 => TypedValue::Long(rng.r#gen()),
        // Raw bits, so NaN payloads and signed zeros show up too.
        6 => TypedValue::Float(f32::from_bits(rng.r#gen())),
        7 => TypedValue::Double(f64::from_bits(rng.r#gen())),
        8 => {
            let len = random_blob_len(rng);
            TypedValue::Str((0..len).map(|_| rng.r#gen::<char>()).collect())
        }
        9 => {
            let len = random_blob_len(rng);
            TypedValue::Bytes((0..len).map(|_| rng.r#gen()).collect())
        }
        10 => TypedValue::Object(random_reference(rng)),
        _ => TypedValue::ObjectWithData(random_reference(rng)),
    }
}

/// Argument lists for `cases` records. The first two are empty and full.
fn random_records(rng: &mut StdRng, cases: usize) -> Vec<EventRecord> {
    (0..cases)
        .map(|case| {
            let argc = match case {
                0 => 0,
                1 => MAX_ARGS,
                _ => rng.gen_range(0..24),
            };
            let args = (0..argc).map(|_| random_value(rng)).collect();
            EventRecord::new(MethodId(rng.gen_range(1..=u16::MAX)), args)
        })
        .collect()
}

/// Equality that compares floats bit for bit.
fn same_value(a: &TypedValue, b: &TypedValue) -> bool {
    match (a, b) {
        (TypedValue::Float(x), TypedValue::Float(y)) => x.to_bits() == y.to_bits(),
        (TypedValue::Double(x), TypedValue::Double(y)) => x.to_bits() == y.to_bits(),
        _ => a == b,
    }
}

fn assert_same_record(decoded: &EventRecord, expected: &EventRecord) {
    assert_eq!(decoded.method, expected.method);
    assert_eq!(decoded.args.len(), expected.args.len());
    for (i, (d, e)) in decoded.args.iter().zip(&expected.args).enumerate() {
        assert!(same_value(d, e), "argument {} of {} differs: {:?} != {:?}", i, expected.method, d, e);
    }
}

#[test]
fn test_random_records_roundtrip() -> Result<()> {
    let mut rng = StdRng::seed_from_u64(0xA11CE);
    let mut records = random_records(&mut rng, 200);
    records.push(EventRecord::new(
        MethodId(9),
        vec![
            TypedValue::Bytes(vec![]),
            TypedValue::Str(String::new()),
            TypedValue::Bytes(vec![0xAB; 1 << 20]),
            TypedValue::Float(f32::NAN),
            TypedValue::Double(-0.0),
        ],
    ));

    for expected in &records {
        let mut enc = Encoder::new();
        encode_record(&mut enc, expected.method, &expected.args)?;
        assert_eq!(enc.as_bytes()[2] as usize, expected.argc());

        let decoded = decode_record(enc.as_bytes())?;
        assert_same_record(&decoded, expected);
    }
    Ok(())
}

#[test]
fn test_random_analyze_frames_through_reader() -> Result<()> {
    let mut rng = StdRng::seed_from_u64(0xF4A3E);
    let mut sent = Vec::new();
    let mut bytes = Vec::new();
    for _ in 0..40 {
        let count = rng.gen_range(1..4);
        let records = random_records(&mut rng, count);
        let ordering_id = rng.gen_range(0..1u64 << 40);
        bytes.extend(Message::Analyze { ordering_id, records: records.clone() }.to_bytes()?);
        sent.push((ordering_id, records));
    }

    let mut reader = FrameReader::new();
    let mut received = Vec::new();
    let mut pos = 0;
    while pos < bytes.len() {
        let n = rng.gen_range(1..=70_000).min(bytes.len() - pos);
        reader.push(&bytes[pos..pos + n]);
        pos += n;
        received.extend(drain(&mut reader)?);
    }
    reader.finish()?;

    assert_eq!(received.len(), sent.len());
    for (message, (ordering_id, expected)) in received.iter().zip(&sent) {
        let Message::Analyze { ordering_id: got, records } = message else {
            panic!("expected an analyze frame, got {:?}", message.kind());
        };
        assert_eq!(got, ordering_id);
        assert_eq!(records.len(), expected.len());
        for (d, e) in records.iter().zip(expected) {
            assert_same_record(d, e);
        }
    }
    Ok(())
}
