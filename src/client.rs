//! The local migasfree client: fixed command verbs for the runner and quick
//! queries answered through its Python API.

use crate::resolver::PackageSet;
use crate::runner::{capture, CommandSpec};
use anyhow::{anyhow, bail, Context, Result};
use serde::Deserialize;
use tracing::debug;

const AVAILABLE_SCRIPT: &str = "from __future__ import print_function; \
from migasfree_client.client import MigasFreeClient; \
print(MigasFreeClient().pms.available_packages(), end='')";

const INSTALLED_SCRIPT: &str = "from __future__ import print_function; import sys; \
from migasfree_client.client import MigasFreeClient; \
pms = MigasFreeClient().pms; \
print([p for p in sys.argv[1:] if pms.is_installed(p)], end='')";

const CHECK_USER_SCRIPT: &str = "import os, sys, pam; \
ok = pam.pam().authenticate(os.environ.get('_LOGIN_MP_USER', ''), os.environ.get('_LOGIN_MP_PASS', '')); \
sys.exit(0 if ok else 1)";

const IDENTITY_SCRIPT: &str = "from __future__ import print_function; import json; \
from migasfree_client import settings, utils; \
conf = utils.get_config(settings.CONF_FILE, 'client'); \
pid, _ = utils.get_graphic_pid(); \
print(json.dumps({'uuid': utils.get_hardware_uuid(), 'project': utils.get_mfc_project(), \
'computer_name': utils.get_mfc_computer_name(), 'server': conf.get('server', 'localhost'), \
'user': utils.get_graphic_user(pid)}), end='')";

/// Who and where this computer is, as reported by the client.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct Identity {
    pub uuid: String,
    pub project: String,
    pub computer_name: String,
    pub server: String,
    pub user: String,
}

#[derive(Debug, Clone)]
pub struct MigasfreeClient {
    program: String,
    python: String,
}

impl MigasfreeClient {
    pub fn new(program: impl Into<String>, python: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            python: python.into(),
        }
    }

    /// Full synchronization with the server.
    pub fn sync_command(&self) -> CommandSpec {
        CommandSpec::new(&self.program).arg("-u")
    }

    pub fn install_command(&self, packages: &[String]) -> CommandSpec {
        self.package_command("-ip", packages)
    }

    pub fn uninstall_command(&self, packages: &[String]) -> CommandSpec {
        self.package_command("-rp", packages)
    }

    fn package_command(&self, verb: &str, packages: &[String]) -> CommandSpec {
        let spec = CommandSpec::new(&self.program)
            .arg(verb)
            .arg(packages.join(" "));
        if cfg!(unix) {
            // Auto-confirm the package manager's prompt.
            spec.env("LC_ALL", "C").stdin("y\n")
        } else {
            spec
        }
    }

    fn python(&self, script: &str) -> CommandSpec {
        CommandSpec::new(&self.python).arg("-c").arg(script)
    }

    /// Packages the package manager can currently see.
    pub async fn available_packages(&self) -> Result<PackageSet> {
        let out = self.query(self.python(AVAILABLE_SCRIPT)).await?;
        Ok(parse_package_list(&out)?.into_iter().collect())
    }

    /// The subset of `candidates` that is installed right now.
    pub async fn installed_packages(&self, candidates: &PackageSet) -> Result<PackageSet> {
        if candidates.is_empty() {
            return Ok(PackageSet::new());
        }
        let out = self.query(self.installed_command(candidates)).await?;
        Ok(parse_package_list(&out)?.into_iter().collect())
    }

    fn installed_command(&self, candidates: &PackageSet) -> CommandSpec {
        self.python(INSTALLED_SCRIPT).args(candidates.iter().cloned())
    }

    /// Local credential check. `Ok(false)` means the credentials were rejected.
    pub async fn check_user(&self, user: &str, password: &str) -> Result<bool> {
        let spec = self
            .python(CHECK_USER_SCRIPT)
            .env("_LOGIN_MP_USER", user)
            .env("_LOGIN_MP_PASS", password);
        let out = capture(&spec).await?;
        debug!(user, exit_code = ?out.code, "credential check finished");
        Ok(out.success())
    }

    pub async fn discover_identity(&self) -> Result<Identity> {
        let out = self.query(self.python(IDENTITY_SCRIPT)).await?;
        serde_json::from_str(out.trim()).context("decode client identity")
    }

    async fn query(&self, spec: CommandSpec) -> Result<String> {
        let out = capture(&spec).await?;
        if !out.success() {
            return Err(anyhow!(
                "{} exited with {:?}: {}",
                self.python,
                out.code,
                out.stderr.trim()
            ));
        }
        Ok(out.stdout)
    }
}

/// Parse a printed Python list of strings, e.g. `['a', "b", u'c']`.
pub fn parse_package_list(raw: &str) -> Result<Vec<String>> {
    let raw = raw.trim();
    let Some(inner) = raw.strip_prefix('[').and_then(|r| r.strip_suffix(']')) else {
        bail!("not a package list: {raw:.60}");
    };

    let mut out = Vec::new();
    let mut chars = inner.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '\'' | '"' => {
                let mut item = String::new();
                let mut closed = false;
                while let Some(n) = chars.next() {
                    match n {
                        '\\' => {
                            if let Some(escaped) = chars.next() {
                                item.push(escaped);
                            }
                        }
                        n if n == c => {
                            closed = true;
                            break;
                        }
                        n => item.push(n),
                    }
                }
                if !closed {
                    bail!("unterminated string in package list");
                }
                out.push(item);
            }
            // Python 2 unicode prefix.
            'u' if matches!(chars.peek(), Some('\'' | '"')) => {}
            ',' => {}
            c if c.is_whitespace() => {}
            other => bail!("unexpected {other:?} in package list"),
        }
    }
    Ok(out)
}
