use std::path::Path;

use crate::command::run_cmd;
use crate::manifest::{ApktoolManifestResolver, ManifestResolver};
use crate::utils::{path_has_ext, path_str};
use crate::{Context, Manifest};

pub const MANIFEST_FILE: &str = "AndroidManifest.xml";

/// Where the attribute tree of a package comes from
///
/// Binary AXML is never read directly; implementations hand back a manifest
/// that has already been decoded to text.
pub trait ManifestSource {
    /// The `package` attribute of the manifest, with references resolved
    fn package_name(&self) -> String {
        self.manifest().package(self.resolver()).into_owned()
    }

    fn manifest(&self) -> &Manifest;

    fn resolver(&self) -> &dyn ManifestResolver;
}

/// A manifest decoded to text, along with the resource values that were
/// next to it
pub struct DecodedSource {
    manifest: Manifest,
    resolver: Option<ApktoolManifestResolver>,
}

impl DecodedSource {
    /// Load a directory produced by `apktool d`
    pub fn from_dir(dir: &Path) -> crate::Result<Self> {
        let manifest = Manifest::from_file(&dir.join(MANIFEST_FILE))?;
        Ok(Self {
            manifest,
            resolver: Some(ApktoolManifestResolver::new(dir)),
        })
    }

    /// Load a plain text manifest
    ///
    /// If the file sits at the root of apktool output the `res/values` next to
    /// it are used to resolve references.
    pub fn from_xml(path: &Path) -> crate::Result<Self> {
        let manifest = Manifest::from_file(path)?;
        let resolver = path
            .parent()
            .filter(|dir| dir.join("res").join("values").is_dir())
            .map(ApktoolManifestResolver::new);
        Ok(Self { manifest, resolver })
    }

    /// Decode `apk` with apktool into a temporary directory and load it
    ///
    /// Sources are skipped (`-s`), only the manifest and resources are needed.
    pub fn from_apk(ctx: &dyn Context, apk: &Path) -> crate::Result<Self> {
        let apktool = ctx.get_bin("apktool")?;
        let tmp = tempfile::Builder::new().prefix("surfprobe-").tempdir()?;
        let out_dir = tmp.path().join("decoded");
        let out_str = path_str(&out_dir);
        let apk_str = path_str(apk);

        log::info!("decoding {} with apktool", apk_str);
        run_cmd(
            &apktool,
            &["d", apk_str.as_ref(), "-o", out_str.as_ref(), "-f", "-s"],
        )?.err_on_status()?;

        // Resource values are loaded eagerly, so the decoded tree can go away
        // with `tmp` once this returns
        Self::from_dir(&out_dir)
    }
}

impl ManifestSource for DecodedSource {
    fn manifest(&self) -> &Manifest {
        &self.manifest
    }

    fn resolver(&self) -> &dyn ManifestResolver {
        &self.resolver
    }
}

/// Open whatever `path` points at: a decoded directory, a text manifest, or
/// an APK to decode
pub fn open_source(ctx: &dyn Context, path: &Path) -> crate::Result<Box<dyn ManifestSource>> {
    if !path.exists() {
        return Err(crate::Error::MissingFile(path_str(path).into_owned()));
    }

    let source = if path.is_dir() {
        DecodedSource::from_dir(path)?
    } else if path_has_ext(path, "xml") {
        DecodedSource::from_xml(path)?
    } else {
        DecodedSource::from_apk(ctx, path)?
    };
    Ok(Box::new(source))
}
