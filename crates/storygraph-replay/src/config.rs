use anyhow::Result;
use std::ffi::OsString;
use std::path::PathBuf;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReplayArgs {
    pub fixture: Option<PathBuf>,
    pub chapter: Option<u32>,
    pub config: Option<PathBuf>,
    pub search: Option<String>,
    pub tap: Option<String>,
    pub seed: u64,
}

impl Default for ReplayArgs {
    fn default() -> Self {
        Self {
            fixture: None,
            chapter: None,
            config: None,
            search: None,
            tap: None,
            seed: 7,
        }
    }
}

pub fn parse_args() -> Result<ReplayArgs> {
    parse_args_from(std::env::args_os().skip(1))
}

fn parse_args_from<I>(args: I) -> Result<ReplayArgs>
where
    I: IntoIterator<Item = OsString>,
{
    let mut out = ReplayArgs::default();
    let mut args = args.into_iter();

    while let Some(arg) = args.next() {
        if arg == "--fixture" {
            let Some(path) = args.next() else {
                anyhow::bail!("--fixture expects a path");
            };
            out.fixture = Some(PathBuf::from(path));
        } else if arg == "--config" {
            let Some(path) = args.next() else {
                anyhow::bail!("--config expects a path");
            };
            out.config = Some(PathBuf::from(path));
        } else if arg == "--chapter" {
            let Some(value) = args.next() else {
                anyhow::bail!("--chapter expects a chapter index");
            };
            let value = value.to_string_lossy();
            out.chapter = Some(
                value
                    .parse()
                    .map_err(|_| anyhow::anyhow!("invalid chapter: {value}"))?,
            );
        } else if arg == "--search" {
            let Some(q) = args.next() else {
                anyhow::bail!("--search expects a query");
            };
            out.search = Some(q.to_string_lossy().into_owned());
        } else if arg == "--tap" {
            let Some(id) = args.next() else {
                anyhow::bail!("--tap expects a character id");
            };
            out.tap = Some(id.to_string_lossy().into_owned());
        } else if arg == "--seed" {
            let Some(value) = args.next() else {
                anyhow::bail!("--seed expects a number");
            };
            let value = value.to_string_lossy();
            out.seed = value
                .parse()
                .map_err(|_| anyhow::anyhow!("invalid seed: {value}"))?;
        } else {
            anyhow::bail!("unknown argument: {:?}", arg);
        }
    }

    Ok(out)
}
