use std::collections::BTreeMap;
use std::ffi::{OsStr, OsString};
use std::path::{Path, PathBuf};

use crate::toolkit::{AUXILIARY_DIRS, PACKAGE_DIRS, TOOLKIT_ENV, ToolkitLocation};

/// Variable the applications read to decide where their parameter file goes.
pub const RESULT_DIR_ENV: &str = "ADAM_USER";

/// Formats the NDF library converts on the fly through `convertndf`.
const CONVERTED_FORMATS: &[&str] = &[
    "ASCII",
    "COMPRESSED",
    "FIGARO",
    "FITS",
    "FITSGZ",
    "GASP",
    "GIF",
    "GZIP",
    "IRAF",
    "STREAM",
    "TEXT",
    "TIFF",
    "UNF0",
    "UNFORMATTED",
];

const NDF_FORMATS_IN: &str = "FITS(.fit),FIGARO(.dst),IRAF(.imh),STREAM(.das),\
UNFORMATTED(.unf),UNF0(.dat),ASCII(.asc),TEXT(.txt),GIF(.gif),TIFF(.tif),\
GASP(.hdr),COMPRESSED(.sdf.Z),GZIP(.sdf.gz),FITS(.fits),FITS(.fts),\
FITS(.FTS),FITS(.FITS),FITS(.FIT),FITS(.lilo),FITS(.lihi),FITS(.silo),\
FITS(.sihi),FITS(.mxlo),FITS(.mxhi),FITS(.rilo),FITS(.rihi),FITS(.vdlo),\
FITS(.vdhi),STREAM(.str),FITSGZ(.fit.gz),FITSGZ(.fits.gz),FITSGZ(.fts.gz)";

const NDF_FORMATS_OUT: &str = ".,FITS(.fit),FITS(.fits),FIGARO(.dst),IRAF(.imh),\
STREAM(.das),UNFORMATTED(.unf),UNF0(.dat),ASCII(.asc),TEXT(.txt),GIF(.gif),\
TIFF(.tif),GASP(.hdr),COMPRESSED(.sdf.Z),GZIP(.sdf.gz),FITSGZ(.fts.gz),\
FITSGZ(.fits.gz)";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EnvOptions {
    /// Let applications prompt for missing parameters.
    pub interactive: bool,
}

/// Build the complete child environment: `inherited` overlaid with the
/// variables the toolkit applications expect.
pub fn build_environment<I>(
    toolkit: &ToolkitLocation,
    scratch: &Path,
    options: EnvOptions,
    inherited: I,
) -> Vec<(OsString, OsString)>
where
    I: IntoIterator<Item = (OsString, OsString)>,
{
    let mut env: BTreeMap<OsString, OsString> = inherited.into_iter().collect();
    let root = toolkit.root();
    let mut set = |key: &str, value: OsString| {
        env.insert(OsString::from(key), value);
    };

    set(TOOLKIT_ENV, root.as_os_str().to_owned());
    set(RESULT_DIR_ENV, scratch.as_os_str().to_owned());
    set("AGI_USER", scratch.as_os_str().to_owned());
    set("ADAM_EXIT", "1".into());

    let noprompt = if options.interactive { "0" } else { "1" };
    set("ADAM_NOPROMPT", noprompt.into());
    set("STARUTIL_NOPROMPT", noprompt.into());

    for (var, rel) in PACKAGE_DIRS.iter().chain(AUXILIARY_DIRS) {
        set(var, root.join(rel).into_os_string());
    }

    for (key, value) in conversion_variables() {
        set(&key, value.into());
    }

    set(
        "PERL5LIB",
        join_paths([
            root.join("Perl/lib/perl5/site_perl"),
            root.join("Perl/lib/perl5"),
        ]),
    );

    let (library_var, java_libs): (&str, &[&str]) = if cfg!(target_os = "macos") {
        (
            "DYLD_LIBRARY_PATH",
            &["starjava/lib/i386", "starjava/lib/x86_64"],
        )
    } else {
        ("LD_LIBRARY_PATH", &["starjava/lib/amd64"])
    };
    let mut library_dirs = vec![root.join("lib")];
    library_dirs.extend(java_libs.iter().map(|rel| root.join(rel)));
    let inherited_libs = env.get(OsStr::new(library_var)).cloned();
    env.insert(
        library_var.into(),
        prepend_paths(library_dirs, inherited_libs.as_deref()),
    );

    let inherited_path = env.get(OsStr::new("PATH")).cloned();
    env.insert(
        "PATH".into(),
        prepend_paths(
            vec![root.join("bin"), root.join("starjava/bin")],
            inherited_path.as_deref(),
        ),
    );

    env.into_iter().collect()
}

fn conversion_variables() -> Vec<(String, String)> {
    let mut vars = vec![
        ("NDF_FORMATS_IN".to_string(), NDF_FORMATS_IN.to_string()),
        ("NDF_FORMATS_OUT".to_string(), NDF_FORMATS_OUT.to_string()),
        (
            "NDF_DEL_GASP".to_string(),
            "f='^dir^name';touch $f.hdr $f.dat;rm $f.hdr $f.dat".to_string(),
        ),
        (
            "NDF_DEL_IRAF".to_string(),
            "f='^dir^name';touch $f.imh $f.pix;rm $f.imh $f.pix".to_string(),
        ),
        ("NDF_SHCVT".to_string(), "0".to_string()),
        ("NDF_TEMP_COMPRESSED".to_string(), "temp_Z_^namecl".to_string()),
        (
            "NDF_TEMP_FITS".to_string(),
            "temp_fits_^namecl^fxscl".to_string(),
        ),
        ("NDF_TEMP_GZIP".to_string(), "temp_gz_^namecl".to_string()),
    ];
    for format in CONVERTED_FORMATS {
        for direction in ["from", "to"] {
            vars.push((
                format!("NDF_{}_{format}", direction.to_ascii_uppercase()),
                format!(
                    "$CONVERT_DIR/convertndf {direction} '^fmt' '^dir' '^name' '^type' '^fxs' '^ndf'"
                ),
            ));
        }
    }
    vars
}

/// Cannot fail in practice: `ToolkitLocation` rejects roots containing the
/// separator and inherited entries come from `split_paths`.
fn join_paths<I: IntoIterator<Item = PathBuf>>(paths: I) -> OsString {
    std::env::join_paths(paths).unwrap_or_default()
}

fn prepend_paths(front: Vec<PathBuf>, existing: Option<&OsStr>) -> OsString {
    let mut all = front;
    if let Some(existing) = existing.filter(|v| !v.is_empty()) {
        for dir in std::env::split_paths(existing) {
            if !all.contains(&dir) {
                all.push(dir);
            }
        }
    }
    join_paths(all)
}
