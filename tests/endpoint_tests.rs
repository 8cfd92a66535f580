// Integration tests for utterance endpointing

mod common;

use common::{input_config, silence_frame, speech_frame};
use loqa_voice::audio::AudioFrame;
use loqa_voice::endpoint::{EndpointConfig, EndpointState, Endpointer, EnergyClassifier};
use loqa_voice::registry;

fn endpointer(threshold_ms: u64) -> Endpointer {
    Endpointer::new(
        Box::new(EnergyClassifier::new(500.0)),
        input_config().frame_bytes(),
        threshold_ms,
    )
}

#[test]
fn test_five_seconds_of_speech_then_silence() {
    let input = input_config();
    let mut ep = endpointer(300);

    for i in 0..500u64 {
        let decision = ep.process(speech_frame(&input).with_timestamp(i * 10));
        assert!(decision.is_speech);
        assert!(decision.event.is_none());
    }
    assert_eq!(ep.state(), EndpointState::InSpeech);

    let mut events = Vec::new();
    for i in 500..531u64 {
        if let Some(event) = ep.process(silence_frame(&input).with_timestamp(i * 10)).event {
            events.push(event);
        }
    }

    assert_eq!(events.len(), 1, "exactly one utterance");
    let event = &events[0];
    assert_eq!(event.frames.len(), 530);
    assert_eq!(event.duration_ms(), 5300);
    // Capture order is preserved, trailing silence included
    let timestamps: Vec<u64> = event.frames.iter().map(|f| f.timestamp_ms).collect();
    let expected: Vec<u64> = (0..530u64).map(|i| i * 10).collect();
    assert_eq!(timestamps, expected);
    assert_eq!(ep.state(), EndpointState::Idle);
    assert_eq!(ep.buffered(), 0);
}

#[test]
fn test_back_to_back_utterances() {
    let input = input_config();
    let mut ep = endpointer(100);
    let mut sizes = Vec::new();

    for speech_frames in [3usize, 7, 1] {
        for _ in 0..speech_frames {
            ep.process(speech_frame(&input));
        }
        for _ in 0..12 {
            if let Some(event) = ep.process(silence_frame(&input)).event {
                sizes.push(event.frames.len());
            }
        }
    }
    assert_eq!(sizes, vec![13, 17, 11]);
}

#[test]
fn test_reset_mid_utterance_emits_nothing() {
    let input = input_config();
    let mut ep = endpointer(100);

    for _ in 0..20 {
        ep.process(speech_frame(&input));
    }
    ep.reset();
    for _ in 0..50 {
        assert!(ep.process(silence_frame(&input)).event.is_none());
    }
    assert_eq!(ep.state(), EndpointState::Idle);
}

#[test]
fn test_frames_of_another_size_are_skipped() {
    let input = input_config();
    let mut ep = endpointer(100);

    ep.process(speech_frame(&input));
    let odd = AudioFrame::silence(input.frame_bytes() / 2, input.sample_rate, 1);
    for _ in 0..40 {
        assert!(ep.process(odd.clone()).event.is_none());
    }
    assert_eq!(ep.state(), EndpointState::InSpeech);
    assert_eq!(ep.buffered(), 1);
}

#[test]
fn test_webrtc_endpointer_ignores_digital_silence() {
    let input = input_config();
    let classifier = registry::classifier(&EndpointConfig::default(), &input).unwrap();
    assert_eq!(classifier.name(), "webrtc");
    let mut ep = Endpointer::new(classifier, input.frame_bytes(), 300);

    for _ in 0..100 {
        let decision = ep.process(silence_frame(&input));
        assert!(!decision.is_speech);
        assert!(decision.event.is_none());
    }
    assert_eq!(ep.state(), EndpointState::Idle);
}
