//! Poll-based reactor.
//!
//! The loop thread owns the epoll instance and the fd table outright;
//! other threads only reach it through [`Command`]s on the hand-off
//! queue. An operation waits for readiness in the required direction,
//! then performs a single non-blocking syscall on the resumed task.

use crate::net::{ServerSocket, SocketHandle};
use crate::reactor::builder::Config;
use crate::reactor::core::{ReactorThread, Shared};
use crate::reactor::event::Event;
use crate::reactor::io::{Direction, FdContext};
use crate::reactor::platform::{
    domain_of, errno, neg_errno, sys_accept, sys_connect, sys_get_socket_error, sys_read,
    sys_socket, sys_write,
};
use crate::reactor::poller::{EpollPoller, Notifier};
use crate::reactor::{AsyncIo, Backend, IoStats};
use crate::task::{Lazy, WaitingFor, awaiter_for};

use libc::{EAGAIN, ECANCELED, ECONNABORTED, EEXIST, EINPROGRESS, EINTR, ENOENT};
use std::collections::HashMap;
use std::io;
use std::net::SocketAddr;
use std::os::fd::RawFd;
use std::sync::Arc;
use std::time::Duration;

pub(crate) enum Command {
    /// Resolve `waiter` once `fd` is ready for `direction`.
    WaitFor {
        fd: RawFd,
        direction: Direction,
        waiter: WaitingFor<bool>,
    },

    /// Resolve `waiter` on the loop thread.
    Schedule { waiter: WaitingFor<bool> },
}

/// The loop-thread half: everything here is touched by that thread only.
struct EpollReactor {
    poller: EpollPoller,
    fds: HashMap<RawFd, FdContext>,

    /// Fds whose wanted interest may differ from the registered one.
    changed: Vec<RawFd>,

    events: Vec<Event>,
    timeout: Duration,
}

impl EpollReactor {
    fn run(mut self, shared: Arc<Shared<Command>>) {
        let mut ready = Vec::new();

        while !shared.stopping() {
            for command in shared.handoff.drain() {
                self.apply(command, &mut ready);
            }

            self.apply_changes(&mut ready);
            shared.publish(self.stats());
            resolve_ready(&mut ready);

            let timeout = if shared.handoff.has_pending() {
                Duration::ZERO
            } else {
                self.timeout
            };

            if let Err(err) = self.poller.poll(&mut self.events, timeout) {
                tracing::error!(error = %err, "epoll_wait failed, stopping reactor");
                break;
            }

            for i in 0..self.events.len() {
                let Event {
                    fd,
                    readable,
                    writable,
                } = self.events[i];

                if let Some(ctx) = self.fds.get_mut(&fd) {
                    ctx.take_ready(readable, writable, &mut ready);
                    self.changed.push(fd);
                }
            }

            // Drop idle registrations before the resumed tasks run: they
            // may close an fd and reuse its number.
            self.apply_changes(&mut ready);
            resolve_ready(&mut ready);
        }

        self.teardown(&shared);
    }

    fn apply(&mut self, command: Command, ready: &mut Vec<WaitingFor<bool>>) {
        match command {
            Command::WaitFor {
                fd,
                direction,
                waiter,
            } => {
                self.fds
                    .entry(fd)
                    .or_insert_with(|| FdContext::new(fd))
                    .set_waiter(direction, waiter);
                self.changed.push(fd);
            }
            Command::Schedule { waiter } => ready.push(waiter),
        }
    }

    /// Brings kernel registrations in line with the pending waiters.
    ///
    /// A registration the kernel refuses resolves its waiters as ready,
    /// so the syscall that follows reports the real error.
    fn apply_changes(&mut self, ready: &mut Vec<WaitingFor<bool>>) {
        for fd in std::mem::take(&mut self.changed) {
            let Some(ctx) = self.fds.get_mut(&fd) else {
                continue;
            };

            ctx.prune();
            let wanted = ctx.wanted();
            if wanted == ctx.registered && !ctx.stale {
                if wanted.is_empty() {
                    self.fds.remove(&fd);
                }
                continue;
            }

            let result = if wanted.is_empty() {
                // The fd may already be closed, which removed it from the
                // epoll set on its own.
                let _ = self.poller.deregister(fd);
                Ok(())
            } else if ctx.registered.is_empty() {
                match self.poller.register(fd, wanted) {
                    Err(err) if err.raw_os_error() == Some(EEXIST) => {
                        self.poller.reregister(fd, wanted)
                    }
                    other => other,
                }
            } else {
                match self.poller.reregister(fd, wanted) {
                    Err(err) if err.raw_os_error() == Some(ENOENT) => {
                        self.poller.register(fd, wanted)
                    }
                    other => other,
                }
            };

            match result {
                Ok(()) => {
                    tracing::trace!(fd, read = wanted.read, write = wanted.write, "interest updated");
                    ctx.registered = wanted;
                    ctx.stale = false;
                    if wanted.is_empty() {
                        self.fds.remove(&fd);
                    }
                }
                Err(err) => {
                    tracing::trace!(fd, error = %err, "registration failed");
                    ctx.take_all(ready);
                    if !ctx.registered.is_empty() {
                        let _ = self.poller.deregister(fd);
                    }
                    self.fds.remove(&fd);
                }
            }
        }
    }

    fn stats(&self) -> IoStats {
        IoStats {
            registered_fds: self
                .fds
                .values()
                .filter(|ctx| !ctx.registered.is_empty())
                .count(),
            pending_ops: self.fds.values().map(FdContext::pending).sum(),
        }
    }

    /// Cancels everything still pending and clears all registrations.
    fn teardown(mut self, shared: &Shared<Command>) {
        let mut cancelled = Vec::new();

        for command in shared.handoff.close() {
            match command {
                Command::WaitFor { waiter, .. } | Command::Schedule { waiter } => {
                    cancelled.push(waiter)
                }
            }
        }

        for (fd, mut ctx) in self.fds.drain() {
            if !ctx.registered.is_empty() {
                let _ = self.poller.deregister(fd);
            }
            ctx.take_all(&mut cancelled);
        }

        shared.publish(self.stats());
        tracing::debug!(reactor = shared.id, cancelled = cancelled.len(), "epoll reactor stopped");

        // Dropping unresolved waiters resumes their tasks as cancelled.
        drop(cancelled);
    }
}

fn resolve_ready(ready: &mut Vec<WaitingFor<bool>>) {
    for mut waiter in ready.drain(..) {
        waiter.set_value(true);
    }
}

/// Poll-based [`AsyncIo`] implementation.
pub(crate) struct EpollIo {
    thread: ReactorThread<Command>,
}

impl EpollIo {
    pub(crate) fn start(config: &Config) -> io::Result<Self> {
        let notifier = Arc::new(Notifier::new()?);
        let reactor = EpollReactor {
            poller: EpollPoller::new(notifier.clone(), config.max_events)?,
            fds: HashMap::new(),
            changed: Vec::new(),
            events: Vec::with_capacity(config.max_events),
            timeout: config.poll_timeout,
        };

        let thread = ReactorThread::spawn(&config.thread_name, notifier, move |shared| {
            reactor.run(shared)
        })?;

        Ok(Self { thread })
    }

    /// Waits until `fd` is ready for `direction`.
    ///
    /// Returns `false` if the reactor stopped first.
    async fn ready(&self, fd: RawFd, direction: Direction) -> bool {
        awaiter_for(|waiter| {
            self.thread.post(Command::WaitFor {
                fd,
                direction,
                waiter,
            })
        })
        .await
        .value()
        .unwrap_or(false)
    }

    /// Waits for readiness, then retries `op` while it would block.
    async fn io_loop(&self, fd: RawFd, direction: Direction, mut op: impl FnMut() -> isize) -> isize {
        loop {
            if !self.ready(fd, direction).await {
                return -(ECANCELED as isize);
            }

            let n = op();
            if n >= 0 {
                return n;
            }

            match errno() {
                EAGAIN | EINTR => continue,
                err => return -(err as isize),
            }
        }
    }
}

impl AsyncIo for EpollIo {
    fn backend(&self) -> Backend {
        Backend::Epoll
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
                if !self.ready(fd, Direction::Read).await {
                    return SocketHandle::invalid(-ECANCELED);
                }

                let client = sys_accept(fd);
                if client >= 0 {
                    return SocketHandle::new(client);
                }

                match errno() {
                    EAGAIN | EINTR | ECONNABORTED => continue,
                    err => return SocketHandle::invalid(-err),
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

            match sys_connect(handle.fd(), &addr) {
                Ok(()) => return handle,
                Err(err) if matches!(err.raw_os_error(), Some(EINPROGRESS | EINTR)) => {}
                Err(err) => return SocketHandle::invalid(neg_errno(&err)),
            }

            if !self.ready(handle.fd(), Direction::Write).await {
                return SocketHandle::invalid(-ECANCELED);
            }

            match sys_get_socket_error(handle.fd()) {
                0 => handle,
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
            self.io_loop(fd, Direction::Read, || sys_read(fd, buf)).await
        })
    }

    fn write<'a>(&'a self, socket: &'a SocketHandle, buf: &'a [u8]) -> Lazy<'a, isize> {
        Lazy::new(async move {
            if !socket.valid() {
                return socket.error() as isize;
            }

            let _busy = socket.begin(Direction::Write);
            let fd = socket.fd();
            self.io_loop(fd, Direction::Write, || sys_write(fd, buf)).await
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

impl Drop for EpollIo {
    fn drop(&mut self) {
        self.thread.shutdown();
    }
}
