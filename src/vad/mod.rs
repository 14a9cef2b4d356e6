//! Voice activity detection over aligned 30 ms frames.
//!
//! A per-frame RMS energy classifier drives a counter-based event machine:
//! a short run of speech frames opens a segment, a ~210 ms pause fires a
//! one-shot prefetch tick, and a ~810 ms pause confirms the end. A ring of
//! recent frames is kept so the transcriber sees the utterance onset.
//!
//! While the agent is audible the machine switches to a parallel barge-in
//! counter that only advances on frames passing the spectral
//! voice-likeness filter.

pub mod likeness;

use crate::audio::frame::{AudioFrame, FRAME_MS};
use crate::config::VadConfig;
use likeness::VoiceLikeness;
use std::collections::VecDeque;

/// Events produced by the detector, in emission order.
#[derive(Debug, Clone)]
pub enum VadEvent {
    /// A speech segment opened. Carries the retained pre-speech window
    /// (up to 200 ms of frames preceding the start).
    SpeechStart { pre_speech: Vec<AudioFrame> },
    /// A frame inside an open segment (speech or intra-segment silence).
    Frame { frame: AudioFrame, is_speech: bool },
    /// ~210 ms of silence inside a segment; fires once per segment.
    PrefetchTick,
    /// The segment is confirmed ended.
    SpeechEnd,
    /// A sustained run of voice-like frames arrived while the agent was
    /// audible. Carries the pre-speech window for the interrupting turn.
    BargeInConfirmed { pre_speech: Vec<AudioFrame> },
}

/// What the session is doing, as seen by the detector.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VadMode {
    /// Normal listening: the full segment machine runs.
    Listening,
    /// The agent is generating or audible: only the barge-in counter runs.
    AgentActive,
}

/// Counter-based voice activity detector.
pub struct VoiceActivityDetector {
    config: VadConfig,
    likeness: VoiceLikeness,
    /// Frames preceding a potential speech start.
    pre_speech: VecDeque<AudioFrame>,
    pre_speech_max: usize,
    in_speech: bool,
    speech_counter: u32,
    silence_counter: u32,
    prefetch_fired: bool,
    barge_in_counter: u32,
}

impl VoiceActivityDetector {
    /// Create a detector from config.
    pub fn new(config: &VadConfig) -> Self {
        let pre_speech_max = (config.pre_speech_ms as usize).div_ceil(FRAME_MS as usize);
        Self {
            config: config.clone(),
            likeness: VoiceLikeness::new(),
            pre_speech: VecDeque::with_capacity(pre_speech_max + 1),
            pre_speech_max,
            in_speech: false,
            speech_counter: 0,
            silence_counter: 0,
            prefetch_fired: false,
            barge_in_counter: 0,
        }
    }

    /// Process one aligned frame, returning the events it produced.
    pub fn process(&mut self, frame: &AudioFrame, mode: VadMode) -> Vec<VadEvent> {
        match mode {
            VadMode::Listening => self.process_listening(frame),
            VadMode::AgentActive => self.process_agent_active(frame),
        }
    }

    /// Whether a segment is currently open.
    pub fn in_speech(&self) -> bool {
        self.in_speech
    }

    /// Reset all detector state.
    pub fn reset(&mut self) {
        self.pre_speech.clear();
        self.in_speech = false;
        self.speech_counter = 0;
        self.silence_counter = 0;
        self.prefetch_fired = false;
        self.barge_in_counter = 0;
    }

    fn process_listening(&mut self, frame: &AudioFrame) -> Vec<VadEvent> {
        // Returning from agent-active mode invalidates the barge-in run.
        self.barge_in_counter = 0;

        let is_speech = frame.rms() > self.config.energy_threshold;
        let mut events = Vec::new();

        if is_speech {
            self.speech_counter += 1;
            self.silence_counter = 0;

            if !self.in_speech && self.speech_counter >= self.config.start_frames {
                self.in_speech = true;
                self.prefetch_fired = false;
                events.push(VadEvent::SpeechStart {
                    pre_speech: self.take_pre_speech(),
                });
            }
        } else {
            self.speech_counter = 0;
            if self.in_speech {
                self.silence_counter += 1;
            }
        }

        if self.in_speech {
            events.push(VadEvent::Frame {
                frame: frame.clone(),
                is_speech,
            });

            if !is_speech {
                if self.silence_counter == self.config.prefetch_silence_frames
                    && !self.prefetch_fired
                {
                    self.prefetch_fired = true;
                    events.push(VadEvent::PrefetchTick);
                }
                if self.silence_counter >= self.config.confirm_silence_frames {
                    self.in_speech = false;
                    self.silence_counter = 0;
                    self.prefetch_fired = false;
                    events.push(VadEvent::SpeechEnd);
                }
            }
        } else {
            self.buffer_pre_speech(frame);
        }

        events
    }

    fn process_agent_active(&mut self, frame: &AudioFrame) -> Vec<VadEvent> {
        // The segment machine is parked while the agent is audible; keep
        // the ring warm so an interrupting turn still gets its onset.
        self.in_speech = false;
        self.speech_counter = 0;
        self.silence_counter = 0;
        self.prefetch_fired = false;
        self.buffer_pre_speech(frame);

        let is_speech = frame.rms() > self.config.energy_threshold;
        if is_speech && self.likeness.is_voice_like(frame) {
            self.barge_in_counter += 1;
        } else {
            self.barge_in_counter = 0;
        }

        if self.barge_in_counter >= self.config.min_interruption_frames {
            self.barge_in_counter = 0;
            // The interrupting utterance is already underway: open the
            // segment so following frames stream to the transcriber.
            self.in_speech = true;
            return vec![VadEvent::BargeInConfirmed {
                pre_speech: self.take_pre_speech(),
            }];
        }

        Vec::new()
    }

    fn buffer_pre_speech(&mut self, frame: &AudioFrame) {
        self.pre_speech.push_back(frame.clone());
        while self.pre_speech.len() > self.pre_speech_max {
            let _ = self.pre_speech.pop_front();
        }
    }

    fn take_pre_speech(&mut self) -> Vec<AudioFrame> {
        self.pre_speech.drain(..).collect()
    }
}
