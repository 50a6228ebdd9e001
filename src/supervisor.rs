//! Supervised execution of a command inside activated crates.
//!
//! The command runs through `/bin/sh -c` as the leader of a new session.
//! `SIGINT`, `SIGTERM` and `SIGCHLD` are blocked in this process and consumed
//! synchronously, so there is no signal handler and no global state: the
//! leader lives in the [`Supervisor`] for the duration of [`Supervisor::run`].
//!
//! On an interrupt every direct child of the leader is terminated, then the
//! leader itself. Termination escalates `SIGINT` → `SIGTERM` → `SIGKILL` and
//! gives up after a bounded time.

use std::fmt;
use std::os::unix::process::CommandExt;
use std::process::Command;
use std::thread::sleep;
use std::time::{Duration, Instant};
use nix::errno::Errno;
use nix::sys::signal::{SigSet, SigmaskHow, Signal, kill};
use nix::sys::wait::{WaitPidFlag, WaitStatus, waitpid};
use nix::unistd::{Pid, setsid};
use sysinfo::{ProcessStatus, ProcessesToUpdate, System};
use tracing::{debug, info, warn};
use crate::error::Result;
use crate::util::maybe_quote;

/// How long [`terminate`] waits between each escalation step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TerminationPolicy {
    pub poll_interval: Duration,
    pub term_after: Duration,
    pub kill_after: Duration,
    pub give_up_after: Duration,
    /// Bound on waiting for the leader to be reaped after an interrupt.
    pub reap_timeout: Duration,
}

impl Default for TerminationPolicy {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(250),
            term_after: Duration::from_secs(1),
            kill_after: Duration::from_secs(2),
            give_up_after: Duration::from_secs(3),
            reap_timeout: Duration::from_secs(5),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Termination {
    /// The process was gone before the first signal.
    AlreadyTerminated,
    Terminated { after: Duration },
    /// Still alive after `SIGKILL` and the full wait.
    Unresponsive,
}

impl fmt::Display for Termination {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Termination::AlreadyTerminated => f.write_str("already terminated"),
            Termination::Terminated { after } => {
                write!(f, "terminated after {:.2} sec", after.as_secs_f64())
            }
            Termination::Unresponsive => f.write_str("unresponsive"),
        }
    }
}

/// How a supervised command ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcome {
    /// The leader finished on its own, with this exit code (128+signal if it was killed).
    Exited(i32),
    /// This process received `signal` and shut the command down.
    Interrupted { signal: Signal },
}

impl RunOutcome {
    /// Exit code for the bulker process itself.
    pub fn exit_code(&self) -> i32 {
        match self {
            RunOutcome::Exited(code) => *code,
            RunOutcome::Interrupted { signal } => 128 + *signal as i32,
        }
    }
}

/// Something that can be signalled and checked for exit.
pub trait Terminable {
    fn pid(&self) -> Pid;
    fn signal(&mut self, signal: Signal) -> nix::Result<()>;
    fn has_exited(&mut self) -> bool;
}

/// A child of this process; exit is detected by reaping it.
#[derive(Debug)]
pub struct ChildProcess {
    pid: Pid,
    exit_code: Option<i32>,
}

impl ChildProcess {
    pub fn new(pid: Pid) -> Self {
        Self { pid, exit_code: None }
    }

    /// The exit code once the child has been reaped.
    pub fn exit_code(&self) -> Option<i32> {
        self.exit_code
    }

    fn try_reap(&mut self) -> Option<i32> {
        if self.exit_code.is_none() {
            match waitpid(self.pid, Some(WaitPidFlag::WNOHANG)) {
                Ok(WaitStatus::Exited(_, code)) => self.exit_code = Some(code),
                Ok(WaitStatus::Signaled(_, signal, _)) => self.exit_code = Some(128 + signal as i32),
                Ok(_) => {}
                Err(Errno::ECHILD) => {
                    debug!("Process {} was reaped elsewhere", self.pid);
                    self.exit_code = Some(0);
                }
                Err(e) => warn!("Failed to check process {}: {}", self.pid, e),
            }
        }
        self.exit_code
    }
}

impl Terminable for ChildProcess {
    fn pid(&self) -> Pid {
        self.pid
    }

    fn signal(&mut self, signal: Signal) -> nix::Result<()> {
        kill(self.pid, signal)
    }

    fn has_exited(&mut self) -> bool {
        self.try_reap().is_some()
    }
}

/// A process that is not our child; exit is detected by probing it.
#[derive(Debug)]
pub struct ForeignProcess {
    pid: Pid,
    system: System,
}

impl ForeignProcess {
    pub fn new(pid: Pid) -> Self {
        Self { pid, system: System::new() }
    }
}

impl Terminable for ForeignProcess {
    fn pid(&self) -> Pid {
        self.pid
    }

    fn signal(&mut self, signal: Signal) -> nix::Result<()> {
        kill(self.pid, signal)
    }

    fn has_exited(&mut self) -> bool {
        if kill(self.pid, None::<Signal>) == Err(Errno::ESRCH) {
            return true;
        }
        // an unreaped zombie still answers the probe
        let pid = sysinfo::Pid::from_u32(self.pid.as_raw() as u32);
        self.system.refresh_processes(ProcessesToUpdate::Some(&[pid]), true);
        self.system
            .process(pid)
            .is_none_or(|process| process.status() == ProcessStatus::Zombie)
    }
}

/// Shuts `target` down: `SIGINT` at once, `SIGTERM` and `SIGKILL` as the policy's
/// deadlines pass, each sent once. Never fails; an unresponsive process is logged.
pub fn terminate(target: &mut dyn Terminable, policy: &TerminationPolicy) -> Termination {
    let pid = target.pid();
    let start = Instant::now();
    match target.signal(Signal::SIGINT) {
        Err(Errno::ESRCH) => return Termination::AlreadyTerminated,
        Err(e) => warn!("Failed to interrupt process {}: {}", pid, e),
        Ok(()) => {}
    }
    let mut sent_term = false;
    let mut sent_kill = false;
    loop {
        if target.has_exited() {
            return Termination::Terminated { after: start.elapsed() };
        }
        let elapsed = start.elapsed();
        if elapsed >= policy.give_up_after && sent_kill {
            warn!("Child process {} was unresponsive", pid);
            return Termination::Unresponsive;
        }
        let escalation = if elapsed >= policy.term_after && !sent_term {
            sent_term = true;
            Some(Signal::SIGTERM)
        } else if elapsed >= policy.kill_after && !sent_kill {
            sent_kill = true;
            Some(Signal::SIGKILL)
        } else {
            None
        };
        if let Some(signal) = escalation {
            debug!("Sending {} to process {}", signal, pid);
            if target.signal(signal) == Err(Errno::ESRCH) {
                return Termination::Terminated { after: start.elapsed() };
            }
        }
        sleep(policy.poll_interval);
    }
}

/// Direct children of `parent`, from the process table.
pub fn child_pids(parent: Pid) -> Vec<Pid> {
    let parent = sysinfo::Pid::from_u32(parent.as_raw() as u32);
    let mut system = System::new();
    system.refresh_processes(ProcessesToUpdate::All, true);
    system
        .processes()
        .iter()
        .filter(|(_, process)| process.thread_kind().is_none() && process.parent() == Some(parent))
        .map(|(pid, _)| Pid::from_raw(pid.as_u32() as i32))
        .collect()
}

/// Joins `PATH` and a command line into a shell command.
pub fn shell_command(path: &str, command: &[String]) -> String {
    let quoted: Vec<String> = command.iter().map(|arg| maybe_quote(arg)).collect();
    format!("export PATH=\"{}\"; {}", path, quoted.join(" "))
}

/// Runs one command at a time and owns its process group while it runs.
#[derive(Debug, Default)]
pub struct Supervisor {
    policy: TerminationPolicy,
    leader: Option<ChildProcess>,
}

impl Supervisor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_policy(policy: TerminationPolicy) -> Self {
        Self { policy, leader: None }
    }

    /// Whether a command is currently running.
    pub fn is_running(&self) -> bool {
        self.leader.is_some()
    }

    /// Runs `command` with `PATH` set to `path` and waits for it.
    ///
    /// Signals are consumed on the calling thread, so this should run before
    /// any other thread is spawned. After an interrupt the signal mask stays
    /// blocked; the caller is expected to exit with [`RunOutcome::exit_code`].
    ///
    /// # Errors
    ///
    /// Returns an error if the shell can't be started or the signal mask can't be changed.
    pub fn run(&mut self, path: &str, command: &[String]) -> Result<RunOutcome> {
        let script = shell_command(path, command);
        debug!("{}", script);

        let mut mask = SigSet::empty();
        mask.add(Signal::SIGINT);
        mask.add(Signal::SIGTERM);
        mask.add(Signal::SIGCHLD);
        let previous = mask.thread_swap_mask(SigmaskHow::SIG_BLOCK)?;

        let mut shell = Command::new("/bin/sh");
        shell.arg("-c").arg(&script).env("PATH", path);
        // SAFETY: only async-signal-safe calls between fork and exec
        unsafe {
            shell.pre_exec(move || {
                setsid()?;
                previous.thread_set_mask()?;
                Ok(())
            });
        }
        let child = match shell.spawn() {
            Ok(child) => child,
            Err(e) => {
                previous.thread_set_mask()?;
                return Err(e.into());
            }
        };
        let pid = Pid::from_raw(child.id() as i32);
        debug!("Started process group leader {}", pid);
        self.leader = Some(ChildProcess::new(pid));

        let outcome = self.wait_for_leader(&mask);
        self.leader = None;
        if let Ok(RunOutcome::Exited(_)) = outcome {
            previous.thread_set_mask()?;
        }
        outcome
    }

    fn wait_for_leader(&mut self, mask: &SigSet) -> Result<RunOutcome> {
        loop {
            let Some(leader) = self.leader.as_mut() else {
                return Ok(RunOutcome::Exited(0));
            };
            if let Some(code) = leader.try_reap() {
                debug!("Process {} exited with {}", leader.pid(), code);
                return Ok(RunOutcome::Exited(code));
            }
            match mask.wait()? {
                Signal::SIGCHLD => continue,
                signal => return Ok(self.interrupt(signal)),
            }
        }
    }

    /// Terminates the leader's children, then the leader, and waits for it to be reaped.
    fn interrupt(&mut self, signal: Signal) -> RunOutcome {
        info!("Received {}. Stopping the running command.", signal);
        let policy = self.policy;
        let Some(leader) = self.leader.as_mut() else {
            return RunOutcome::Interrupted { signal };
        };
        for pid in child_pids(leader.pid()) {
            let outcome = terminate(&mut ForeignProcess::new(pid), &policy);
            info!("Child process {} {}", pid, outcome);
        }
        let outcome = terminate(&mut *leader, &policy);
        info!("Child process {} {}", leader.pid(), outcome);

        let deadline = Instant::now() + policy.reap_timeout;
        while !leader.has_exited() && Instant::now() < deadline {
            sleep(policy.poll_interval);
        }
        if !leader.has_exited() {
            warn!("Process {} was not reaped", leader.pid());
        }
        RunOutcome::Interrupted { signal }
    }
}
