use std::{
    collections::BTreeMap,
    ffi::{OsStr, OsString},
    path::{Path, PathBuf},
    process::Stdio,
};
use tokio::process::Command;

/// Description of a worker command line, turned into a [`Command`] at spawn time.
#[derive(Debug, Clone)]
pub struct CommandBuilder {
    program: OsString,
    argv: Vec<OsString>,
    envs: BTreeMap<OsString, OsString>,
    cwd: Option<PathBuf>,
}

impl CommandBuilder {
    pub fn new<S: AsRef<OsStr>>(program: S) -> Self {
        Self {
            program: program.as_ref().to_owned(),
            argv: Vec::new(),
            envs: BTreeMap::new(),
            cwd: None,
        }
    }

    /// The worker runs with exactly the environment set here, nothing is inherited implicitly.
    /// Stdout and stderr are piped, and on Unix the worker leads its own process group.
    pub fn build(self) -> Command {
        let mut command = Command::new(&self.program);
        command
            .args(&self.argv)
            .env_clear()
            .envs(&self.envs)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(cwd) = self.cwd {
            command.current_dir(cwd);
        }
        #[cfg(unix)]
        command.process_group(0);
        command
    }

    pub fn arg<S: AsRef<OsStr>>(&mut self, arg: S) -> &mut Self {
        self.argv.push(arg.as_ref().to_owned());
        self
    }

    pub fn args<I, S>(&mut self, args: I) -> &mut Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        for arg in args {
            self.arg(arg.as_ref());
        }
        self
    }

    pub fn envs<I, K, V>(&mut self, vars: I) -> &mut Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<OsStr>,
        V: AsRef<OsStr>,
    {
        for (key, value) in vars {
            self.envs
                .insert(key.as_ref().to_owned(), value.as_ref().to_owned());
        }
        self
    }

    pub fn current_dir<D: AsRef<Path>>(&mut self, dir: D) -> &mut Self {
        self.cwd = Some(dir.as_ref().to_owned());
        self
    }

    pub fn get_program(&self) -> &OsStr {
        &self.program
    }

    pub fn get_current_dir(&self) -> Option<&Path> {
        self.cwd.as_deref()
    }

    pub fn get_env(&self, key: &str) -> Option<&OsStr> {
        self.envs.get(OsStr::new(key)).map(OsString::as_os_str)
    }

    /// Run the current command through `wrapper`, e.g. an interpreter for a script entry.
    pub fn wrap<S, I, T>(&mut self, wrapper: S, wrapper_args: I) -> &mut Self
    where
        S: AsRef<OsStr>,
        I: IntoIterator<Item = T>,
        T: AsRef<OsStr>,
    {
        let mut new_argv = wrapper_args
            .into_iter()
            .map(|arg| arg.as_ref().to_owned())
            .collect::<Vec<_>>();
        new_argv.push(self.program.clone());
        new_argv.extend(self.argv.iter().cloned());

        self.program = wrapper.as_ref().to_owned();
        self.argv = new_argv;
        self
    }

    /// Returns the command line as a string for logging
    pub fn as_command_line(&self) -> String {
        let mut parts: Vec<String> = vec![self.program.to_string_lossy().into_owned()];
        parts.extend(
            self.argv
                .iter()
                .map(|arg| arg.to_string_lossy().into_owned()),
        );
        shell_words::join(parts)
    }
}
