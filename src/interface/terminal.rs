// Terminal interface
//
// The terminal is an external collaborator: reads and writes never block,
// and a readiness hook tells waiters when input arrives.

use crate::interface::types::WinSize;
use crate::interface::wakeup::WakeUpRegistry;

use parking_lot::Mutex;
use std::collections::VecDeque;
use std::io::{Read, Write};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

pub trait Terminal: Send + Sync {
    /// Drains up to `buf.len()` bytes of pending input. Returns zero when
    /// nothing is pending, or at end of input once `avail` reports true.
    fn read(&self, buf: &mut [u8]) -> usize;

    /// Emits `buf` and returns the number of bytes taken.
    fn write(&self, buf: &[u8]) -> usize;

    /// True when a read would make progress (data or end of input).
    fn avail(&self) -> bool;

    fn size(&self) -> WinSize;

    /// Registers a waiter set to be notified whenever input becomes available.
    fn connect_read_avail(&self, registry: Arc<WakeUpRegistry>);
}

#[derive(Default)]
struct TerminalInput {
    pending: VecDeque<u8>,
    closed: bool,
    listeners: Vec<Arc<WakeUpRegistry>>,
}

impl TerminalInput {
    fn notify(&self) {
        for registry in self.listeners.iter() {
            registry.notify_all();
        }
    }
}

/// A terminal backed by memory buffers, scripted by the caller.
pub struct MemoryTerminal {
    input: Mutex<TerminalInput>,
    output: Mutex<Vec<u8>>,
    size: WinSize,
}

impl MemoryTerminal {
    pub fn new(columns: u16, rows: u16) -> Arc<MemoryTerminal> {
        Arc::new(MemoryTerminal {
            input: Mutex::new(TerminalInput::default()),
            output: Mutex::new(Vec::new()),
            size: WinSize { columns, rows },
        })
    }

    pub fn push_input(&self, bytes: &[u8]) {
        let mut input = self.input.lock();
        input.pending.extend(bytes.iter().copied());
        input.notify();
    }

    /// Signals end of input; subsequent reads return end-of-stream.
    pub fn close_input(&self) {
        let mut input = self.input.lock();
        input.closed = true;
        input.notify();
    }

    pub fn output(&self) -> Vec<u8> {
        self.output.lock().clone()
    }

    pub fn output_string(&self) -> String {
        String::from_utf8_lossy(&self.output.lock()).into_owned()
    }
}

impl Terminal for MemoryTerminal {
    fn read(&self, buf: &mut [u8]) -> usize {
        let mut input = self.input.lock();
        let n = buf.len().min(input.pending.len());
        for (dst, src) in buf.iter_mut().zip(input.pending.drain(..n)) {
            *dst = src;
        }
        n
    }

    fn write(&self, buf: &[u8]) -> usize {
        self.output.lock().extend_from_slice(buf);
        buf.len()
    }

    fn avail(&self) -> bool {
        let input = self.input.lock();
        !input.pending.is_empty() || input.closed
    }

    fn size(&self) -> WinSize {
        self.size
    }

    fn connect_read_avail(&self, registry: Arc<WakeUpRegistry>) {
        self.input.lock().listeners.push(registry);
    }
}

/// The host's standard streams.
///
/// A background thread pumps stdin into a buffer so that reads never block
/// the calling process.
pub struct StdioTerminal {
    input: Arc<Mutex<TerminalInput>>,
    started: AtomicBool,
    size: WinSize,
}

impl StdioTerminal {
    pub fn new() -> Arc<StdioTerminal> {
        Arc::new(StdioTerminal {
            input: Arc::new(Mutex::new(TerminalInput::default())),
            started: AtomicBool::new(false),
            size: WinSize {
                columns: 80,
                rows: 24,
            },
        })
    }

    fn start_pump(&self) {
        if self.started.swap(true, Ordering::SeqCst) {
            return;
        }
        let input = self.input.clone();
        let spawned = std::thread::Builder::new()
            .name("stdin-pump".to_string())
            .spawn(move || {
                let mut stdin = std::io::stdin();
                let mut buf = [0u8; 1024];
                loop {
                    match stdin.read(&mut buf) {
                        Ok(0) | Err(_) => {
                            let mut input = input.lock();
                            input.closed = true;
                            input.notify();
                            break;
                        }
                        Ok(n) => {
                            let mut input = input.lock();
                            input.pending.extend(buf[..n].iter().copied());
                            input.notify();
                        }
                    }
                }
            });
        if let Err(e) = spawned {
            log::error!("cannot start stdin pump: {}", e);
            let mut input = self.input.lock();
            input.closed = true;
        }
    }
}

impl Terminal for StdioTerminal {
    fn read(&self, buf: &mut [u8]) -> usize {
        self.start_pump();
        let mut input = self.input.lock();
        let n = buf.len().min(input.pending.len());
        for (dst, src) in buf.iter_mut().zip(input.pending.drain(..n)) {
            *dst = src;
        }
        n
    }

    fn write(&self, buf: &[u8]) -> usize {
        let mut stdout = std::io::stdout().lock();
        match stdout.write_all(buf).and_then(|_| stdout.flush()) {
            Ok(()) => buf.len(),
            Err(e) => {
                log::warn!("terminal write failed: {}", e);
                0
            }
        }
    }

    fn avail(&self) -> bool {
        self.start_pump();
        let input = self.input.lock();
        !input.pending.is_empty() || input.closed
    }

    fn size(&self) -> WinSize {
        self.size
    }

    fn connect_read_avail(&self, registry: Arc<WakeUpRegistry>) {
        self.input.lock().listeners.push(registry);
    }
}
