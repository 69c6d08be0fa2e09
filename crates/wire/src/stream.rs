//! Byte stream accumulation.
use crate::{Envelope, Error, HEADER_LEN, MAX_FRAME_SIZE};

/// Frame stream decoder.
///
/// Turns an arbitrarily chunked byte stream into envelopes. A frame split
/// across reads is held back until it is complete.
#[derive(Debug, Default)]
pub struct Decoder {
    unparsed: Vec<u8>,
}

impl Decoder {
    /// Create a new stream decoder.
    pub fn new(capacity: usize) -> Self {
        Self {
            unparsed: Vec::with_capacity(capacity),
        }
    }

    /// Input bytes into the decoder.
    pub fn input(&mut self, bytes: &[u8]) {
        self.unparsed.extend_from_slice(bytes);
    }

    /// Decode and return the next envelope. Returns [`None`] while the
    /// buffered data is shorter than one complete frame.
    ///
    /// An undecodable payload is consumed before the error is returned, so
    /// the stream stays aligned on frame boundaries and decoding can
    /// continue with the next frame.
    pub fn decode_next(&mut self) -> Result<Option<Envelope>, Error> {
        if self.unparsed.len() < HEADER_LEN {
            return Ok(None);
        }

        let mut header = [0u8; HEADER_LEN];
        header.copy_from_slice(&self.unparsed[..HEADER_LEN]);
        let length = u32::from_be_bytes(header) as usize;

        if length == 0 {
            return Err(Error::EmptyFrame);
        }
        if length > MAX_FRAME_SIZE {
            return Err(Error::OversizedFrame(length));
        }

        if self.unparsed.len() < HEADER_LEN + length {
            return Ok(None);
        }

        let result = ciborium::from_reader(&self.unparsed[HEADER_LEN..HEADER_LEN + length]);
        self.unparsed.drain(..HEADER_LEN + length);

        match result {
            Ok(envelope) => Ok(Some(envelope)),
            Err(err) => Err(Error::Decode(err)),
        }
    }
}

#[cfg(test)]
mod tests {
    use ciborium::Value;
    use quickcheck::quickcheck;

    use hyperion_types::{CheckState, ClusterEvent, LogLevel, LogRecord};

    use crate::{actions, arg, encode, encode_request, from_value, to_value, Envelope, Error};

    use super::Decoder;

    #[test]
    fn decodes_a_frame_fed_in_pieces() {
        let frame = encode_request(actions::CHECK, vec![Value::from("redis@h1")]).unwrap();
        let mut decoder = Decoder::new(64);

        let (body, tail) = frame.split_at(frame.len() - 1);
        for chunk in body.chunks(3) {
            decoder.input(chunk);
            assert!(decoder.decode_next().unwrap().is_none());
        }
        decoder.input(tail);
        let envelope = decoder.decode_next().unwrap().unwrap();

        assert_eq!(envelope.action.as_deref(), Some(actions::CHECK));
        assert_eq!(arg::<String>(&envelope.args, 0).unwrap(), "redis@h1");
        assert!(decoder.decode_next().unwrap().is_none());
    }

    #[test]
    fn decodes_back_to_back_frames() {
        let mut decoder = Decoder::new(64);
        let first = encode_request(actions::QUIT, vec![]).unwrap();
        let second = encode_request(actions::SUSPEND, vec![]).unwrap();

        decoder.input(&first);
        decoder.input(&second);

        assert_eq!(
            decoder.decode_next().unwrap().unwrap().action.as_deref(),
            Some(actions::QUIT)
        );
        assert_eq!(
            decoder.decode_next().unwrap().unwrap().action.as_deref(),
            Some(actions::SUSPEND)
        );
        assert!(decoder.decode_next().unwrap().is_none());
    }

    #[test]
    fn events_roundtrip_through_the_codec() {
        let event = ClusterEvent::Check {
            comp_id: "redis@h1".into(),
            check_state: CheckState::Running,
        };
        let frame =
            encode_request(actions::QUEUE_EVENT, vec![to_value(&event).unwrap()]).unwrap();

        let mut decoder = Decoder::new(64);
        decoder.input(&frame);
        let envelope = decoder.decode_next().unwrap().unwrap();

        let decoded: ClusterEvent = arg(&envelope.args, 0).unwrap();
        assert_eq!(decoded, event);
    }

    #[test]
    fn actionless_frames_are_log_records() {
        let record = LogRecord {
            name: "hyperion.slave".into(),
            level: LogLevel::Warn,
            message: "component check failed".into(),
            created: 1700000000.25,
        };
        let frame = encode(&Envelope::log(&record).unwrap()).unwrap();

        let mut decoder = Decoder::new(64);
        decoder.input(&frame);
        let envelope = decoder.decode_next().unwrap().unwrap();

        assert!(envelope.is_log_record());
        assert_eq!(envelope.log_record().unwrap(), record);
    }

    #[test]
    fn zero_length_header_is_a_framing_error() {
        let mut decoder = Decoder::new(8);
        decoder.input(&[0, 0, 0, 0]);

        let err = decoder.decode_next().unwrap_err();
        assert!(matches!(err, Error::EmptyFrame));
        assert!(err.is_framing());
    }

    #[test]
    fn oversized_header_is_a_framing_error() {
        let mut decoder = Decoder::new(8);
        decoder.input(&u32::MAX.to_be_bytes());

        let err = decoder.decode_next().unwrap_err();
        assert!(matches!(err, Error::OversizedFrame(_)));
        assert!(err.is_framing());
    }

    #[test]
    fn garbage_payload_keeps_the_stream_aligned() {
        let mut decoder = Decoder::new(64);
        // A frame whose payload is not CBOR for an envelope.
        decoder.input(&4u32.to_be_bytes());
        decoder.input(&[0xde, 0xad, 0xbe, 0xef]);
        decoder.input(&encode_request(actions::QUIT, vec![]).unwrap());

        assert!(!decoder.decode_next().unwrap_err().is_framing());
        // The next frame decodes as if nothing happened.
        assert_eq!(
            decoder.decode_next().unwrap().unwrap().action.as_deref(),
            Some(actions::QUIT)
        );
    }

    quickcheck! {
        fn roundtrip(action: String, numbers: Vec<i64>, words: Vec<String>) -> bool {
            let args: Vec<Value> = numbers
                .iter()
                .map(|n| Value::from(*n))
                .chain(words.iter().map(|w| Value::from(w.clone())))
                .collect();
            let envelope = Envelope::request(action, args);
            let frame = encode(&envelope).unwrap();

            let mut decoder = Decoder::new(frame.len());
            decoder.input(&frame);

            decoder.decode_next().unwrap() == Some(envelope)
        }

        fn length_header_matches_payload(words: Vec<String>) -> bool {
            let args = words.into_iter().map(Value::from).collect();
            let frame = encode_request("check", args).unwrap();

            let mut header = [0u8; 4];
            header.copy_from_slice(&frame[..4]);

            u32::from_be_bytes(header) as usize == frame.len() - 4
        }
    }

    #[test]
    fn typed_values_roundtrip() {
        let stats: Vec<(String, u16)> = vec![("h1".into(), 4000), ("h2".into(), 4001)];
        let value = to_value(&stats).unwrap();
        let back: Vec<(String, u16)> = from_value(&value).unwrap();
        assert_eq!(back, stats);
    }
}
