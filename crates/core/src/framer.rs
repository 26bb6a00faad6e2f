use bytes::Bytes;

use crate::errors::Result;
use crate::message::Message;

/// A composable codec that converts messages to bytes and back,
/// delimiting message boundaries on byte-stream transports. Each framer
/// owns its own parse state; there is no global framer registry.
pub trait Framer: Send + Sync {
    /// Encodes one outbound message into zero or more byte chunks. Fails
    /// with a send-scoped error on size-limit or invariant violations.
    fn frame_outbound(&mut self, message: &Message) -> Result<Vec<Bytes>>;

    /// Feeds newly-arrived bytes into this framer's internal buffer and
    /// returns every message that became complete as a result. Any
    /// trailing partial data is retained internally.
    fn parse_inbound(&mut self, bytes: &[u8]) -> Result<Vec<Message>>;

    /// Resets parse state; called when the owning connection reaches
    /// Established.
    fn connection_did_open(&mut self) {}

    /// Resets parse state; called when the owning connection leaves
    /// Established.
    fn connection_did_close(&mut self) {}
}

/// An ordered stack of framers. Outbound: the last framer added runs
/// first (innermost first). Inbound: the first framer added runs first.
/// The pipeline is configured during Preestablishment and frozen when
/// the owning Connection transitions to Established.
pub struct FramerPipeline {
    framers: Vec<Box<dyn Framer>>,
    frozen: bool,
}

impl Default for FramerPipeline {
    fn default() -> Self {
        Self::new()
    }
}

impl FramerPipeline {
    pub fn new() -> Self {
        FramerPipeline {
            framers: Vec::new(),
            frozen: false,
        }
    }

    /// Adds a framer to the end of the stack (it will run last on the
    /// outbound path, first on the inbound path). Returns an error if
    /// the pipeline has already been frozen.
    pub fn add(&mut self, framer: Box<dyn Framer>) -> Result<()> {
        if self.frozen {
            return Err(crate::errors::Error::not_supported(
                "framer pipeline is frozen once the connection is Established",
            ));
        }
        self.framers.push(framer);
        Ok(())
    }

    pub fn freeze(&mut self) {
        self.frozen = true;
    }

    pub fn is_empty(&self) -> bool {
        self.framers.is_empty()
    }

    pub fn notify_open(&mut self) {
        for f in self.framers.iter_mut() {
            f.connection_did_open();
        }
    }

    pub fn notify_close(&mut self) {
        for f in self.framers.iter_mut() {
            f.connection_did_close();
        }
    }

    /// Runs the outbound encode chain: `Fn-1` first, each resulting
    /// chunk re-wrapped as an opaque `Message` and fed to `Fn-2`, ...,
    /// down to `F0`.
    pub fn encode_outbound(&mut self, message: &Message) -> Result<Vec<Bytes>> {
        if self.framers.is_empty() {
            return Ok(vec![message.data.clone()]);
        }

        let last = self.framers.len() - 1;
        let mut chunks = self.framers[last].frame_outbound(message)?;

        for framer in self.framers[..last].iter_mut().rev() {
            let mut next = Vec::with_capacity(chunks.len());
            for chunk in chunks {
                let wrapped = Message::new(chunk);
                next.extend(framer.frame_outbound(&wrapped)?);
            }
            chunks = next;
        }
        Ok(chunks)
    }

    /// Runs the inbound parse chain: `F0` first against raw transport
    /// bytes, each completed message fed to `F1`, ..., up to `Fn-1`.
    /// Messages exiting the last framer are ready for the receive queue.
    pub fn decode_inbound(&mut self, bytes: &[u8]) -> Result<Vec<Message>> {
        if self.framers.is_empty() {
            return Ok(vec![Message::new(bytes.to_vec())]);
        }

        let mut messages = self.framers[0].parse_inbound(bytes)?;
        for framer in self.framers[1..].iter_mut() {
            let mut next = Vec::with_capacity(messages.len());
            for m in messages {
                next.extend(framer.parse_inbound(&m.data)?);
            }
            messages = next;
        }
        Ok(messages)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Uppercases on the way out, lowercases on the way in; lets tests
    /// observe composition order without a real wire framer.
    struct ShoutFramer;
    impl Framer for ShoutFramer {
        fn frame_outbound(&mut self, message: &Message) -> Result<Vec<Bytes>> {
            let upper = String::from_utf8_lossy(&message.data).to_uppercase();
            Ok(vec![Bytes::from(upper.into_bytes())])
        }
        fn parse_inbound(&mut self, bytes: &[u8]) -> Result<Vec<Message>> {
            let lower = String::from_utf8_lossy(bytes).to_lowercase();
            Ok(vec![Message::new(lower.into_bytes())])
        }
    }

    /// Prefixes with its tag on the way out, strips it on the way in.
    struct TagFramer(&'static str);
    impl Framer for TagFramer {
        fn frame_outbound(&mut self, message: &Message) -> Result<Vec<Bytes>> {
            let mut out = self.0.as_bytes().to_vec();
            out.extend_from_slice(&message.data);
            Ok(vec![Bytes::from(out)])
        }
        fn parse_inbound(&mut self, bytes: &[u8]) -> Result<Vec<Message>> {
            let stripped = &bytes[self.0.len()..];
            Ok(vec![Message::new(stripped.to_vec())])
        }
    }

    #[test]
    fn empty_pipeline_passes_bytes_through() {
        let mut pipeline = FramerPipeline::new();
        let chunks = pipeline.encode_outbound(&Message::new(&b"hi"[..])).unwrap();
        assert_eq!(chunks, vec![Bytes::from_static(b"hi")]);
    }

    #[test]
    fn last_added_framer_runs_first_outbound() {
        let mut pipeline = FramerPipeline::new();
        pipeline.add(Box::new(TagFramer("A:"))).unwrap();
        pipeline.add(Box::new(TagFramer("B:"))).unwrap();

        let chunks = pipeline.encode_outbound(&Message::new(&b"x"[..])).unwrap();
        // B runs first (last added), then A wraps its output.
        assert_eq!(chunks, vec![Bytes::from_static(b"A:B:x")]);
    }

    #[test]
    fn first_added_framer_runs_first_inbound() {
        let mut pipeline = FramerPipeline::new();
        pipeline.add(Box::new(TagFramer("A:"))).unwrap();
        pipeline.add(Box::new(TagFramer("B:"))).unwrap();

        let messages = pipeline.decode_inbound(b"A:B:x").unwrap();
        assert_eq!(messages.len(), 1);
        assert_eq!(&messages[0].data[..], b"x");
    }

    #[test]
    fn round_trips_through_composed_framers() {
        let mut pipeline = FramerPipeline::new();
        pipeline.add(Box::new(ShoutFramer)).unwrap();

        let chunks = pipeline.encode_outbound(&Message::new(&b"hello"[..])).unwrap();
        let wire: Vec<u8> = chunks.into_iter().flatten().collect();
        assert_eq!(wire, b"HELLO");

        let messages = pipeline.decode_inbound(&wire).unwrap();
        assert_eq!(&messages[0].data[..], b"hello");
    }

    #[test]
    fn adding_to_a_frozen_pipeline_fails() {
        let mut pipeline = FramerPipeline::new();
        pipeline.freeze();
        let err = pipeline.add(Box::new(ShoutFramer)).unwrap_err();
        assert!(matches!(err, crate::errors::Error::NotSupported { .. }));
    }
}
