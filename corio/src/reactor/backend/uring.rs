//! Submission-queue reactor on `io_uring`.
//!
//! Every operation is one SQE whose slab index is its `user_data`. The
//! reactor owns all memory the kernel may touch: reads land in a
//! reactor-owned buffer that is copied out on completion, writes are
//! copied in before submission. An awaiting task that goes away
//! therefore never leaves the kernel pointing at freed memory.

use crate::net::{ServerSocket, SocketHandle};
use crate::reactor::builder::Config;
use crate::reactor::core::{ReactorThread, Shared};
use crate::reactor::io::Direction;
use crate::reactor::platform::{
    SOCKFLAGS, domain_of, neg_errno, socketaddr_to_storage, sys_get_socket_error, sys_socket,
};
use crate::reactor::poller::Notifier;
use crate::reactor::{AsyncIo, Backend, IoStats};
use crate::task::{Lazy, WaitingFor, awaiter_for};
use crate::utils::Slab;

use io_uring::types::Fd;
use io_uring::{IoUring, Probe, opcode, squeue};
use libc::{
    EAGAIN, EALREADY, EBUSY, ECANCELED, ECONNABORTED, EINPROGRESS, EINTR, POLLIN, POLLOUT,
    sockaddr, sockaddr_storage, socklen_t,
};
use std::collections::{HashMap, HashSet};
use std::io;
use std::net::SocketAddr;
use std::os::fd::RawFd;
use std::sync::{Arc, OnceLock};
use std::time::Duration;

/// `user_data` of the notifier's poll.
const WAKE_TOKEN: u64 = u64::MAX;

/// `user_data` of cancellation requests; their completions are ignored.
const CANCEL_TOKEN: u64 = u64::MAX - 1;

/// Upper bound on completion-draining rounds at shutdown.
const DRAIN_ROUNDS: usize = 100;

/// Returns `true` when the running kernel supports every opcode the
/// `io_uring` reactor submits.
///
/// The check runs once per process; the answer is cached.
pub fn io_uring_supported() -> bool {
    static SUPPORTED: OnceLock<bool> = OnceLock::new();

    *SUPPORTED.get_or_init(|| match check_opcodes() {
        Ok(supported) => {
            tracing::debug!(supported, "io_uring support checked");
            supported
        }
        Err(err) => {
            tracing::debug!(error = %err, "io_uring unavailable");
            false
        }
    })
}

fn check_opcodes() -> io::Result<bool> {
    let ring = IoUring::new(2)?;
    let mut opcodes = Probe::new();
    ring.submitter().register_probe(&mut opcodes)?;

    Ok([
        opcode::Accept::CODE,
        opcode::Connect::CODE,
        opcode::Read::CODE,
        opcode::Write::CODE,
        opcode::PollAdd::CODE,
        opcode::AsyncCancel::CODE,
    ]
    .into_iter()
    .all(|code| opcodes.is_supported(code)))
}

/// One in-flight operation and the memory the kernel may access.
pub(crate) enum Op {
    Accept {
        fd: RawFd,
    },
    Connect {
        fd: RawFd,
        addr: Box<sockaddr_storage>,
        len: socklen_t,
    },
    Read {
        fd: RawFd,
        buf: Vec<u8>,
    },
    Write {
        fd: RawFd,
        buf: Vec<u8>,
    },
    Poll {
        fd: RawFd,
        mask: u32,
    },
}

impl Op {
    fn fd(&self) -> RawFd {
        match self {
            Op::Accept { fd }
            | Op::Connect { fd, .. }
            | Op::Read { fd, .. }
            | Op::Write { fd, .. }
            | Op::Poll { fd, .. } => *fd,
        }
    }

    /// The fd direction this operation occupies until it completes.
    fn direction(&self) -> Direction {
        match self {
            Op::Accept { .. } | Op::Read { .. } => Direction::Read,
            Op::Connect { .. } | Op::Write { .. } => Direction::Write,
            Op::Poll { mask, .. } if *mask & POLLOUT as u32 != 0 => Direction::Write,
            Op::Poll { .. } => Direction::Read,
        }
    }

    fn key(&self) -> (RawFd, Direction) {
        (self.fd(), self.direction())
    }

    fn entry(&mut self) -> squeue::Entry {
        match self {
            Op::Accept { fd } => {
                opcode::Accept::new(Fd(*fd), std::ptr::null_mut(), std::ptr::null_mut())
                    .flags(SOCKFLAGS)
                    .build()
            }
            Op::Connect { fd, addr, len } => {
                let addr = addr.as_ref() as *const sockaddr_storage as *const sockaddr;
                opcode::Connect::new(Fd(*fd), addr, *len).build()
            }
            Op::Read { fd, buf } => {
                opcode::Read::new(Fd(*fd), buf.as_mut_ptr(), buf.len() as u32).build()
            }
            Op::Write { fd, buf } => {
                opcode::Write::new(Fd(*fd), buf.as_ptr(), buf.len() as u32).build()
            }
            Op::Poll { fd, mask } => opcode::PollAdd::new(Fd(*fd), *mask).build(),
        }
    }
}

/// The raw signed result of an operation, with its memory handed back.
pub(crate) struct Completion {
    result: i32,
    op: Op,
}

pub(crate) enum Command {
    Submit {
        op: Op,
        waiter: WaitingFor<Completion>,
    },
    Schedule {
        waiter: WaitingFor<bool>,
    },
}

struct Pending {
    op: Op,

    /// `None` once the waiter was cancelled at shutdown.
    waiter: Option<WaitingFor<Completion>>,
}

struct UringReactor {
    ring: IoUring,
    ops: Slab<Pending>,

    /// The in-flight operation holding each fd direction.
    occupied: HashMap<(RawFd, Direction), usize>,

    notifier: Arc<Notifier>,

    /// Whether the notifier's poll is in flight.
    armed: bool,
}

impl UringReactor {
    fn run(mut self, shared: Arc<Shared<Command>>) {
        let mut scheduled = Vec::new();
        let mut done = Vec::new();

        while !shared.stopping() {
            for command in shared.handoff.drain() {
                match command {
                    Command::Submit { op, waiter } => self.submit(op, waiter, &mut done),
                    Command::Schedule { waiter } => scheduled.push(waiter),
                }
            }

            resolve(&mut done);
            for mut waiter in scheduled.drain(..) {
                waiter.set_value(true);
            }

            if !self.armed {
                let entry = opcode::PollAdd::new(Fd(self.notifier.fd()), POLLIN as u32)
                    .build()
                    .user_data(WAKE_TOKEN);
                self.armed = self.push(&entry).is_ok();
            }

            shared.publish(self.stats());

            let want = if shared.handoff.has_pending() { 0 } else { 1 };
            match self.ring.submit_and_wait(want) {
                Ok(_) => {}
                Err(err) if matches!(err.raw_os_error(), Some(EINTR | EBUSY)) => {}
                Err(err) => {
                    tracing::error!(error = %err, "io_uring submit failed, stopping reactor");
                    break;
                }
            }

            self.reap(&mut done);
            resolve(&mut done);
        }

        self.teardown(&shared);
    }

    /// Pushes an SQE, flushing the submission queue once if it is full.
    fn push(&mut self, entry: &squeue::Entry) -> io::Result<()> {
        for _ in 0..2 {
            if unsafe { self.ring.submission().push(entry) }.is_ok() {
                return Ok(());
            }

            self.ring.submit()?;
        }

        Err(io::Error::from_raw_os_error(EBUSY))
    }

    /// Queues `op`.
    ///
    /// # Panics
    ///
    /// Panics if another operation in the same direction is in flight on
    /// the fd, unless its task was dropped: that one is cancelled.
    fn submit(
        &mut self,
        op: Op,
        waiter: WaitingFor<Completion>,
        done: &mut Vec<(WaitingFor<Completion>, Completion)>,
    ) {
        let key = op.key();
        if let Some(&previous) = self.occupied.get(&key) {
            let abandoned = self.ops.get_mut(previous).is_none_or(|pending| {
                pending
                    .waiter
                    .as_ref()
                    .is_none_or(WaitingFor::is_abandoned)
            });

            assert!(
                abandoned,
                "concurrent {:?} on fd {} while one is already pending",
                key.1, key.0
            );
            self.cancel(previous as u64);
        }

        let index = self.ops.insert(Pending {
            op,
            waiter: Some(waiter),
        });
        self.occupied.insert(key, index);

        let entry = match self.ops.get_mut(index) {
            Some(pending) => pending.op.entry().user_data(index as u64),
            None => return,
        };

        if let Err(err) = self.push(&entry) {
            self.occupied.remove(&key);
            let Pending { op, waiter } = self.ops.remove(index);
            if let Some(waiter) = waiter {
                let result = neg_errno(&err);
                done.push((waiter, Completion { result, op }));
            }
        }
    }

    /// Asks the kernel to cancel the operation tagged `user_data`.
    fn cancel(&mut self, user_data: u64) {
        let entry = opcode::AsyncCancel::new(user_data)
            .build()
            .user_data(CANCEL_TOKEN);
        if let Err(err) = self.push(&entry) {
            tracing::warn!(error = %err, "failed to queue cancellation");
        }
    }

    /// Collects every available completion.
    fn reap(&mut self, done: &mut Vec<(WaitingFor<Completion>, Completion)>) {
        let completions: Vec<(u64, i32)> = self
            .ring
            .completion()
            .map(|cqe| (cqe.user_data(), cqe.result()))
            .collect();

        for (user_data, result) in completions {
            match user_data {
                WAKE_TOKEN => {
                    self.notifier.drain();
                    self.armed = false;
                }
                CANCEL_TOKEN => {}
                index => {
                    let index = index as usize;
                    if !self.ops.contains(index) {
                        continue;
                    }

                    let Pending { op, waiter } = self.ops.remove(index);
                    tracing::trace!(index, result, "operation completed");

                    let key = op.key();
                    if self.occupied.get(&key) == Some(&index) {
                        self.occupied.remove(&key);
                    }

                    if let Some(waiter) = waiter {
                        done.push((waiter, Completion { result, op }));
                    }
                }
            }
        }
    }

    fn stats(&mut self) -> IoStats {
        let mut fds = HashSet::new();
        for (_, pending) in self.ops.iter_mut() {
            fds.insert(pending.op.fd());
        }

        IoStats {
            registered_fds: fds.len(),
            pending_ops: self.ops.len(),
        }
    }

    /// Cancels every in-flight operation and waits for the kernel to let
    /// go of its buffers.
    fn teardown(mut self, shared: &Shared<Command>) {
        let leftovers = shared.handoff.close();

        let mut waiters = Vec::new();
        let mut cancels = Vec::new();
        for (index, pending) in self.ops.iter_mut() {
            waiters.extend(pending.waiter.take());
            cancels.push(index as u64);
        }
        if self.armed {
            cancels.push(WAKE_TOKEN);
        }

        for user_data in cancels {
            self.cancel(user_data);
        }

        let mut ignored = Vec::new();
        for _ in 0..DRAIN_ROUNDS {
            if self.ops.is_empty() && !self.armed {
                break;
            }

            if let Err(err) = self.ring.submit() {
                if err.raw_os_error() != Some(EINTR) {
                    break;
                }
            }

            self.reap(&mut ignored);
            if !(self.ops.is_empty() && !self.armed) {
                std::thread::sleep(Duration::from_millis(1));
            }
        }

        // Whatever is left is reported as still pending.
        shared.publish(self.stats());

        if !self.ops.is_empty() {
            // The kernel may still write into these buffers.
            tracing::warn!(in_flight = self.ops.len(), "leaking buffers of uncancelled operations");
            std::mem::forget(std::mem::replace(&mut self.ops, Slab::new(0)));
        }
        self.occupied.clear();
        tracing::debug!(
            reactor = shared.id,
            cancelled = waiters.len() + leftovers.len(),
            "io_uring reactor stopped"
        );

        // Unresolved waiters resume their tasks as cancelled.
        drop(leftovers);
        drop(waiters);
    }
}

fn resolve(done: &mut Vec<(WaitingFor<Completion>, Completion)>) {
    for (mut waiter, completion) in done.drain(..) {
        waiter.set_value(completion);
    }
}

/// `io_uring`-based [`AsyncIo`] implementation.
pub(crate) struct UringIo {
    thread: ReactorThread<Command>,
}

impl UringIo {
    pub(crate) fn start(config: &Config) -> io::Result<Self> {
        let notifier = Arc::new(Notifier::new()?);
        let reactor = UringReactor {
            ring: IoUring::new(config.ring_entries)?,
            ops: Slab::new(64),
            occupied: HashMap::new(),
            notifier: notifier.clone(),
            armed: false,
        };

        let thread = ReactorThread::spawn(&config.thread_name, notifier, move |shared| {
            reactor.run(shared)
        })?;

        Ok(Self { thread })
    }

    /// Submits `op`; `None` means the reactor stopped first.
    async fn submit(&self, op: Op) -> Option<Completion> {
        awaiter_for(move |waiter| self.thread.post(Command::Submit { op, waiter }))
            .await
            .value()
    }

    /// Waits until `fd` reports one of `mask`.
    async fn poll(&self, fd: RawFd, mask: i16) -> bool {
        self.submit(Op::Poll {
            fd,
            mask: mask as u32,
        })
        .await
        .is_some()
    }

    /// Waits for the outcome of a connect that is in progress.
    async fn finish_connect(&self, handle: SocketHandle) -> SocketHandle {
        if !self.poll(handle.fd(), POLLOUT).await {
            return SocketHandle::invalid(-ECANCELED);
        }

        match sys_get_socket_error(handle.fd()) {
            0 => handle,
            err => SocketHandle::invalid(-err),
        }
    }
}

impl AsyncIo for UringIo {
    fn backend(&self) -> Backend {
        Backend::IoUring
    }

    fn in_thread(&self) -> bool {
        self.thread.in_thread()
    }

    fn accept<'a>(&'a self, listener: &'a ServerSocket) -> Lazy<'a, SocketHandle> {
        Lazy::new(async move {
            let handle = listener.handle();
            if !handle.valid() {
                return SocketHandle::invalid(handle.error());
            }

            let _busy = handle.begin(Direction::Read);
            let fd = handle.fd();
            loop {
                let Some(completion) = self.submit(Op::Accept { fd }).await else {
                    return SocketHandle::invalid(-ECANCELED);
                };

                match completion.result {
                    client if client >= 0 => return SocketHandle::new(client),
                    err if err == -EAGAIN => {
                        if !self.poll(fd, POLLIN).await {
                            return SocketHandle::invalid(-ECANCELED);
                        }
                    }
                    err if err == -EINTR || err == -ECONNABORTED => {}
                    err => return SocketHandle::invalid(err),
                }
            }
        })
    }

    fn connect(&self, addr: SocketAddr) -> Lazy<'_, SocketHandle> {
        Lazy::new(async move {
            let handle = match sys_socket(domain_of(&addr)) {
                Ok(fd) => SocketHandle::new(fd),
                Err(err) => return SocketHandle::invalid(neg_errno(&err)),
            };

            let (storage, len) = socketaddr_to_storage(&addr);
            let op = Op::Connect {
                fd: handle.fd(),
                addr: Box::new(storage),
                len,
            };

            let Some(completion) = self.submit(op).await else {
                return SocketHandle::invalid(-ECANCELED);
            };

            match -completion.result {
                0 => handle,
                EINPROGRESS | EALREADY | EINTR | EAGAIN => self.finish_connect(handle).await,
                err => SocketHandle::invalid(-err),
            }
        })
    }

    fn read<'a>(&'a self, socket: &'a SocketHandle, buf: &'a mut [u8]) -> Lazy<'a, isize> {
        Lazy::new(async move {
            if !socket.valid() {
                return socket.error() as isize;
            }

            let _busy = socket.begin(Direction::Read);
            let fd = socket.fd();
            let mut scratch = vec![0u8; buf.len()];
            loop {
                let Some(completion) = self.submit(Op::Read { fd, buf: scratch }).await else {
                    return -(ECANCELED as isize);
                };

                let Completion { result, op } = completion;
                let Op::Read { buf: returned, .. } = op else {
                    return -(libc::EIO as isize);
                };

                if result >= 0 {
                    let n = result as usize;
                    buf[..n].copy_from_slice(&returned[..n]);
                    return n as isize;
                }

                scratch = returned;
                match -result {
                    EAGAIN => {
                        if !self.poll(fd, POLLIN).await {
                            return -(ECANCELED as isize);
                        }
                    }
                    EINTR => {}
                    _ => return result as isize,
                }
            }
        })
    }

    fn write<'a>(&'a self, socket: &'a SocketHandle, buf: &'a [u8]) -> Lazy<'a, isize> {
        Lazy::new(async move {
            if !socket.valid() {
                return socket.error() as isize;
            }

            let _busy = socket.begin(Direction::Write);
            let fd = socket.fd();
            let mut data = buf.to_vec();
            loop {
                let Some(completion) = self.submit(Op::Write { fd, buf: data }).await else {
                    return -(ECANCELED as isize);
                };

                let Completion { result, op } = completion;
                if result >= 0 {
                    return result as isize;
                }

                let Op::Write { buf: returned, .. } = op else {
                    return -(libc::EIO as isize);
                };
                data = returned;

                match -result {
                    EAGAIN => {
                        if !self.poll(fd, POLLOUT).await {
                            return -(ECANCELED as isize);
                        }
                    }
                    EINTR => {}
                    _ => return result as isize,
                }
            }
        })
    }

    fn schedule(&self) -> Lazy<'_, bool> {
        Lazy::new(async move {
            awaiter_for(|waiter| self.thread.post(Command::Schedule { waiter }))
                .await
                .value()
                .unwrap_or(false)
        })
    }

    fn shutdown(&self) {
        self.thread.shutdown();
    }

    fn stats(&self) -> IoStats {
        self.thread.stats()
    }
}

impl Drop for UringIo {
    fn drop(&mut self) {
        self.thread.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::Op;
    use crate::reactor::io::Direction;

    use libc::{POLLIN, POLLOUT};

    #[test]
    fn ops_occupy_their_direction() {
        let read_side = [
            Op::Accept { fd: 4 },
            Op::Read { fd: 4, buf: vec![0; 8] },
            Op::Poll { fd: 4, mask: POLLIN as u32 },
        ];
        for op in &read_side {
            assert_eq!(op.key(), (4, Direction::Read));
        }

        let write_side = [
            Op::Write { fd: 4, buf: vec![1] },
            Op::Poll { fd: 4, mask: POLLOUT as u32 },
        ];
        for op in &write_side {
            assert_eq!(op.key(), (4, Direction::Write));
        }
    }
}
