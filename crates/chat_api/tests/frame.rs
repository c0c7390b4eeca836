use chat_api::{FrameDecoder, StreamFrame};

fn tokens(frames: &[StreamFrame]) -> Vec<String> {
    frames
        .iter()
        .filter_map(|frame| frame.token().map(ToOwned::to_owned))
        .collect()
}

fn decode_in_chunks(input: &[u8], cuts: &[usize]) -> Vec<StreamFrame> {
    let mut decoder = FrameDecoder::default();
    let mut frames = Vec::new();
    let mut start = 0;
    for &cut in cuts {
        frames.extend(decoder.feed(&input[start..cut]));
        start = cut;
    }
    frames.extend(decoder.feed(&input[start..]));
    frames.extend(decoder.finish());
    frames
}

const MIXED_BODY: &str = concat!(
    "data: {\"token\":\"Hel\"}\n\n",
    "{\"content\":\"lo\"}\n",
    "data: \" wörld\"\n",
    "\n",
    "plain tail ✓\r\n",
    "{\"type\":\"ping\"}\n",
    "data: [DONE]\n",
    "no newline at end",
);

#[test]
fn sse_token_frames_decode_in_order() {
    let frames = FrameDecoder::decode_all(b"data: {\"token\":\"Hel\"}\n\ndata: {\"token\":\"lo\"}\n\n");
    assert_eq!(tokens(&frames), vec!["Hel", "lo"]);
    assert_eq!(frames.last(), Some(&StreamFrame::Terminal));
}

#[test]
fn json_split_across_chunks_decodes_once() {
    let frames = decode_in_chunks(b"data: {\"token\":\"Hi\"}\n\n", &[11]);
    assert_eq!(tokens(&frames), vec!["Hi"]);

    let mut decoder = FrameDecoder::default();
    assert!(decoder.feed(b"data: {\"tok").is_empty());
    let frames = decoder.feed(b"en\":\"Hi\"}\n\n");
    assert_eq!(tokens(&frames), vec!["Hi"]);
}

#[test]
fn mixed_framings_decode_to_expected_tokens() {
    let frames = FrameDecoder::decode_all(MIXED_BODY.as_bytes());
    assert_eq!(
        tokens(&frames),
        vec!["Hel", "lo", " wörld", "plain tail ✓", "no newline at end"]
    );
}

#[test]
fn decoding_is_invariant_under_every_two_way_split() {
    let input = MIXED_BODY.as_bytes();
    let expected = FrameDecoder::decode_all(input);

    for cut in 0..=input.len() {
        assert_eq!(decode_in_chunks(input, &[cut]), expected, "split at byte {cut}");
    }
}

#[test]
fn decoding_is_invariant_under_byte_at_a_time_feeding() {
    let input = MIXED_BODY.as_bytes();
    let cuts: Vec<usize> = (1..input.len()).collect();
    assert_eq!(decode_in_chunks(input, &cuts), FrameDecoder::decode_all(input));
}

#[test]
fn decoding_is_invariant_under_three_way_splits() {
    let input = MIXED_BODY.as_bytes();
    let expected = FrameDecoder::decode_all(input);

    for first in (0..input.len()).step_by(3) {
        for second in (first..=input.len()).step_by(5) {
            assert_eq!(
                decode_in_chunks(input, &[first, second]),
                expected,
                "splits at {first} and {second}"
            );
        }
    }
}

#[test]
fn carry_over_is_flushed_before_terminal() {
    let mut decoder = FrameDecoder::default();
    assert!(decoder.feed(b"{\"token\":\"last\"}").is_empty());
    assert_eq!(
        decoder.finish(),
        vec![StreamFrame::TokenDelta("last".to_owned()), StreamFrame::Terminal]
    );
}

#[test]
fn empty_body_yields_only_terminal() {
    assert_eq!(FrameDecoder::decode_all(b""), vec![StreamFrame::Terminal]);
    assert_eq!(FrameDecoder::decode_all(b"\n\n  \n"), vec![StreamFrame::Terminal]);
}
