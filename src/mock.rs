//! Scripted in-memory instrument for exercising drivers without hardware.
//!
//! Every complete line written to a [`MockTransport`] is recorded and handed to
//! a responder closure; whatever the closure returns is queued as the reply.
//! Reading with nothing queued fails with `TimedOut`, the way a silent serial
//! port or VISA session does. Unsolicited output can be queued through an
//! [`Inbox`].

use std::cell::RefCell;
use std::collections::VecDeque;
use std::io::{self, Read, Write};
use std::rc::Rc;

use crate::pwm::DiscardInput;

type Responder = Box<dyn FnMut(&str) -> Option<String>>;

pub struct MockTransport {
    responder: Responder,
    log: CommandLog,
    partial: Vec<u8>,
    replies: Rc<RefCell<VecDeque<u8>>>,
}

impl MockTransport {
    pub fn new<F>(responder: F) -> Self
    where
        F: FnMut(&str) -> Option<String> + 'static,
    {
        MockTransport {
            responder: Box::new(responder),
            log: CommandLog::default(),
            partial: Vec::new(),
            replies: Rc::default(),
        }
    }

    /// Handle on the commands received, usable after the transport is moved.
    pub fn log(&self) -> CommandLog {
        self.log.clone()
    }

    /// Handle for queueing bytes the instrument sends on its own.
    pub fn inbox(&self) -> Inbox {
        Inbox(Rc::clone(&self.replies))
    }
}

impl Read for MockTransport {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let mut replies = self.replies.borrow_mut();
        if replies.is_empty() {
            return Err(io::Error::new(io::ErrorKind::TimedOut, "no reply queued"));
        }
        let n = buf.len().min(replies.len());
        for (slot, byte) in buf.iter_mut().zip(replies.drain(..n)) {
            *slot = byte;
        }
        Ok(n)
    }
}

impl Write for MockTransport {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.partial.extend_from_slice(buf);
        while let Some(pos) = self.partial.iter().position(|&b| b == b'\n') {
            let line: Vec<u8> = self.partial.drain(..=pos).collect();
            let line = String::from_utf8_lossy(&line).trim_end().to_string();
            self.log.0.borrow_mut().push(line.clone());
            if let Some(reply) = (self.responder)(&line) {
                Inbox(Rc::clone(&self.replies)).push_line(&reply);
            }
        }
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl DiscardInput for MockTransport {
    fn discard_input(&mut self) -> io::Result<()> {
        self.replies.borrow_mut().clear();
        Ok(())
    }
}

#[derive(Clone)]
pub struct Inbox(Rc<RefCell<VecDeque<u8>>>);

impl Inbox {
    /// Queue `text` followed by a newline.
    pub fn push_line(&self, text: &str) {
        let mut replies = self.0.borrow_mut();
        replies.extend(text.bytes());
        replies.push_back(b'\n');
    }
}

#[derive(Clone, Default)]
pub struct CommandLog(Rc<RefCell<Vec<String>>>);

impl CommandLog {
    pub fn commands(&self) -> Vec<String> {
        self.0.borrow().clone()
    }

    pub fn count(&self, command: &str) -> usize {
        self.0.borrow().iter().filter(|c| c.as_str() == command).count()
    }
}
