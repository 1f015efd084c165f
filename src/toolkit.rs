use std::ffi::OsString;
use std::path::{Path, PathBuf};

use log::{info, warn};

use crate::errors::{Result, StarError};

/// Environment variable naming the toolkit installation root.
pub const TOOLKIT_ENV: &str = "STARLINK_DIR";

/// Directory every installation must contain.
const LAYOUT_MARKER: &str = "bin";

/// An application shipped with every full installation; finding it above the
/// running executable means we are installed inside a toolkit tree.
const INSTALL_PROBE: &str = "bin/smurf/makemap";

/// Package directory variables, relative to the installation root.
pub const PACKAGE_DIRS: &[(&str, &str)] = &[
    ("ATOOLS_DIR", "bin/atools"),
    ("AUTOASTROM_DIR", "Perl/bin"),
    ("CCDPACK_DIR", "bin/ccdpack"),
    ("CONVERT_DIR", "bin/convert"),
    ("CUPID_DIR", "bin/cupid"),
    ("CURSA_DIR", "bin/cursa"),
    ("DAOPHOT_DIR", "bin/daophot"),
    ("DATACUBE_DIR", "bin/datacube"),
    ("DIPSO_DIR", "bin/dipso"),
    ("ECHOMOP_DIR", "bin/echomop"),
    ("ESP_DIR", "bin/esp"),
    ("EXTRACTOR_DIR", "bin/extractor"),
    ("FIG_DIR", "bin/figaro"),
    ("FLUXES_DIR", "bin/fluxes"),
    ("FROG_DIR", "starjava/bin/frog"),
    ("GAIA_DIR", "bin/gaia"),
    ("HDSTOOLS_DIR", "bin/hdstools"),
    ("HDSTRACE_DIR", "bin"),
    ("KAPPA_DIR", "bin/kappa"),
    ("ORAC_DIR", "bin/oracdr/src"),
    ("PAMELA_DIR", "bin/pamela"),
    ("PERIOD_DIR", "bin/period"),
    ("PGPLOT_DIR", "bin"),
    ("PHOTOM_DIR", "bin/photom"),
    ("PISA_DIR", "bin/pisa"),
    ("POLPACK_DIR", "bin/polpack"),
    ("SMURF_DIR", "bin/smurf"),
    ("SPLAT_DIR", "starjava/bin/splat"),
    ("SST_DIR", "bin/sst"),
    ("STILTS_DIR", "starjava/bin/stilts"),
    ("SURF_DIR", "bin/surf"),
    ("TSP_DIR", "bin/tsp"),
];

/// Other root-relative variables some applications read.
pub const AUXILIARY_DIRS: &[(&str, &str)] = &[
    ("FIGARO_PROG_N", "bin/figaro"),
    ("FIGARO_PROG_S", "etc/figaro"),
    ("ORAC_CAL_ROOT", "bin/oracdr/cal"),
    ("ORAC_PERL5LIB", "bin/oracdr/src/lib/perl5"),
    ("PONGO_BIN", "bin/pongo"),
    ("SYS_SPECX", "share/specx"),
];

/// A validated toolkit installation root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolkitLocation {
    root: PathBuf,
}

impl ToolkitLocation {
    /// Validate `path` as an installation root.
    pub fn new(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if !path.is_dir() {
            return Err(StarError::Configuration(format!(
                "toolkit directory {} does not exist",
                path.display()
            )));
        }
        if !path.join(LAYOUT_MARKER).is_dir() {
            return Err(StarError::Configuration(format!(
                "{} has no {LAYOUT_MARKER}/ directory; not a toolkit installation",
                path.display()
            )));
        }
        let root = path.canonicalize()?;
        // The root is spliced into PATH-style variables.
        if std::env::join_paths([&root]).is_err() {
            return Err(StarError::Configuration(format!(
                "toolkit directory {} contains a path list separator",
                root.display()
            )));
        }
        Ok(Self { root })
    }

    /// Resolve the installation: explicit path, then `$STARLINK_DIR`, then an
    /// installation enclosing the running executable.
    pub fn locate(explicit: Option<&Path>) -> Result<Self> {
        locate_with(
            explicit,
            std::env::var_os(TOOLKIT_ENV),
            std::env::current_exe().ok(),
        )
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn bin_dir(&self) -> PathBuf {
        self.root.join(LAYOUT_MARKER)
    }

    /// Absolute value of a package or auxiliary directory variable.
    pub fn dir_var(&self, name: &str) -> Option<PathBuf> {
        if name == TOOLKIT_ENV {
            return Some(self.root.clone());
        }
        PACKAGE_DIRS
            .iter()
            .chain(AUXILIARY_DIRS)
            .find(|(var, _)| *var == name)
            .map(|(_, rel)| self.root.join(rel))
    }

    /// Expand `$VAR` and `${VAR}` references to package directories.
    pub fn expand(&self, program: &str) -> PathBuf {
        if !program.contains('$') {
            return PathBuf::from(program);
        }

        let mut expanded = program.to_string();
        let root = (TOOLKIT_ENV, "");
        for (var, rel) in PACKAGE_DIRS.iter().chain(std::iter::once(&root)) {
            let value = self.root.join(rel);
            let value = value.to_string_lossy();
            let value = value.trim_end_matches('/');
            expanded = expanded.replace(&format!("${{{var}}}"), value);
            expanded = replace_bare_var(&expanded, var, value);
        }
        PathBuf::from(expanded)
    }
}

/// Replace `$VAR` only when not followed by another identifier character, so
/// `$SURF_DIR` never eats part of a longer name.
fn replace_bare_var(input: &str, var: &str, value: &str) -> String {
    let needle = format!("${var}");
    let mut out = String::with_capacity(input.len());
    let mut rest = input;
    while let Some(pos) = rest.find(&needle) {
        let after = &rest[pos + needle.len()..];
        let continues = after
            .chars()
            .next()
            .is_some_and(|c| c.is_ascii_alphanumeric() || c == '_');
        out.push_str(&rest[..pos]);
        if continues {
            out.push_str(&needle);
        } else {
            out.push_str(value);
        }
        rest = after;
    }
    out.push_str(rest);
    out
}

pub(crate) fn locate_with(
    explicit: Option<&Path>,
    env_value: Option<OsString>,
    current_exe: Option<PathBuf>,
) -> Result<ToolkitLocation> {
    if let Some(path) = explicit {
        let location = ToolkitLocation::new(path)?;
        info!("Using toolkit at {}", location.root().display());
        return Ok(location);
    }

    if let Some(value) = env_value.filter(|v| !v.is_empty()) {
        let location = ToolkitLocation::new(PathBuf::from(value))?;
        info!("Using ${TOOLKIT_ENV} toolkit at {}", location.root().display());
        return Ok(location);
    }

    if let Some(root) = current_exe.as_deref().and_then(enclosing_installation) {
        let location = ToolkitLocation::new(root)?;
        info!("Using enclosing toolkit at {}", location.root().display());
        return Ok(location);
    }

    warn!("Could not find the toolkit: set ${TOOLKIT_ENV} or change the toolkit path");
    Err(StarError::Configuration(format!(
        "no toolkit found: set ${TOOLKIT_ENV} or pass an explicit path"
    )))
}

fn enclosing_installation(exe: &Path) -> Option<PathBuf> {
    exe.ancestors()
        .skip(1)
        .find(|dir| is_executable(&dir.join(INSTALL_PROBE)))
        .map(Path::to_path_buf)
}

pub(crate) fn is_executable(path: &Path) -> bool {
    if !path.is_file() {
        return false;
    }

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::metadata(path)
            .map(|m| (m.permissions().mode() & 0o111) != 0)
            .unwrap_or(false)
    }

    #[cfg(not(unix))]
    {
        true
    }
}
