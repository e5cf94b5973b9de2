//! Command execution. Manifests are printed to stdout as pretty JSON;
//! content goes to stdout unchanged.

use crate::cli::{Command, Details, ExtractionCommand, FileCommand, LibraryCommand, WorkspaceCommand};
use crate::error::{ErrorKind, Result};
use exn::{OptionExt, ResultExt};
use futures::TryStreamExt;
use serde_json::Value;
use shelf_storage::{ContentReader, ContentStream, ExtractionOptions, GroupUpdate, SourceMeta, StorageService};
use std::path::Path;
use tokio::io::{AsyncWriteExt, stdout};
use tokio_util::compat::TokioAsyncReadCompatExt;

const STDIN: &str = "-";

pub async fn run(storage: &dyn StorageService, command: Command) -> Result<()> {
    match command {
        Command::Workspace(command) => workspace(storage, command).await,
        Command::Library(command) => library(storage, command).await,
        Command::File(command) => file(storage, command).await,
        Command::Extraction(command) => extraction(storage, command).await,
        Command::Reconcile { workspace, library, file } => {
            let stats = storage
                .reconcile(&workspace, library.as_deref(), file.as_deref())
                .await
                .or_raise(|| ErrorKind::Storage)?;
            print_json(&stats).await
        },
        Command::Stats { path } => {
            let stats = storage.folder_stats(&path).await.or_raise(|| ErrorKind::Storage)?;
            print_json(&serde_json::json!({"bytes": stats.bytes, "files": stats.files})).await
        },
    }
}

async fn workspace(storage: &dyn StorageService, command: WorkspaceCommand) -> Result<()> {
    match command {
        WorkspaceCommand::List => print_lines(storage.list_workspaces().await.or_raise(|| ErrorKind::Storage)?).await,
        WorkspaceCommand::Create { id, details } => {
            let (name, settings) = (details.name.clone().unwrap_or_else(|| id.clone()), parse_settings(&details)?);
            let manifest = storage.create_workspace(&id, &name, settings).await.or_raise(|| ErrorKind::Storage)?;
            print_json(&manifest).await
        },
        WorkspaceCommand::Show { id } => {
            print_json(&storage.get_workspace_manifest(&id).await.or_raise(|| ErrorKind::Storage)?).await
        },
        WorkspaceCommand::Update { id, details } => {
            let update = group_update(details)?;
            print_json(&storage.update_workspace(&id, update).await.or_raise(|| ErrorKind::Storage)?).await
        },
    }
}

async fn library(storage: &dyn StorageService, command: LibraryCommand) -> Result<()> {
    match command {
        LibraryCommand::List { workspace } => {
            print_lines(storage.list_libraries(&workspace).await.or_raise(|| ErrorKind::Storage)?).await
        },
        LibraryCommand::Create { workspace, id, details } => {
            let (name, settings) = (details.name.clone().unwrap_or_else(|| id.clone()), parse_settings(&details)?);
            let manifest =
                storage.create_library(&workspace, &id, &name, settings).await.or_raise(|| ErrorKind::Storage)?;
            print_json(&manifest).await
        },
        LibraryCommand::Show { workspace, id } => {
            print_json(&storage.get_library_manifest(&workspace, &id).await.or_raise(|| ErrorKind::Storage)?).await
        },
        LibraryCommand::Update { workspace, id, details } => {
            let update = group_update(details)?;
            let manifest = storage.update_library(&workspace, &id, update).await.or_raise(|| ErrorKind::Storage)?;
            print_json(&manifest).await
        },
        LibraryCommand::Move { workspace, id, to } => {
            print_json(&storage.move_library(&workspace, &id, &to).await.or_raise(|| ErrorKind::Storage)?).await
        },
    }
}

async fn file(storage: &dyn StorageService, command: FileCommand) -> Result<()> {
    match command {
        FileCommand::List { workspace, library } => {
            print_lines(storage.list_files(&workspace, &library).await.or_raise(|| ErrorKind::Storage)?).await
        },
        FileCommand::Put { workspace, library, id, input, name, mime } => {
            let name = match name {
                Some(name) => name,
                None => input
                    .file_name()
                    .and_then(|name| name.to_str())
                    .filter(|name| *name != STDIN)
                    .ok_or_raise(|| ErrorKind::Input("--name is required when reading stdin".to_string()))?
                    .to_string(),
            };
            let content = open(&input).await?;
            let write = storage
                .write_source(&workspace, &library, &id, content, SourceMeta::new(name, mime))
                .await
                .or_raise(|| ErrorKind::Storage)?;
            tracing::debug!(transition = ?write.transition, "Source stored");
            print_json(&write.manifest).await
        },
        FileCommand::Cat { workspace, library, id } => {
            copy_to_stdout(storage.read_source(&workspace, &library, &id).await.or_raise(|| ErrorKind::Storage)?).await
        },
        FileCommand::Show { workspace, library, id } => {
            print_json(&storage.get_file_manifest(&workspace, &library, &id).await.or_raise(|| ErrorKind::Storage)?)
                .await
        },
        FileCommand::Rm { workspace, library, id } => {
            print_json(&storage.delete_file(&workspace, &library, &id).await.or_raise(|| ErrorKind::Storage)?).await
        },
    }
}

async fn extraction(storage: &dyn StorageService, command: ExtractionCommand) -> Result<()> {
    match command {
        ExtractionCommand::List { workspace, library, file } => {
            let methods = storage.list_extractions(&workspace, &library, &file).await.or_raise(|| ErrorKind::Storage)?;
            print_lines(methods).await
        },
        ExtractionCommand::Put { workspace, library, file, method, inputs, method_config, rows } => {
            let options = ExtractionOptions {
                config: method_config.as_deref().map(parse_json).transpose()?.unwrap_or_else(|| serde_json::json!({})),
                total_rows: rows,
            };
            let metadata = match inputs.as_slice() {
                [input] => {
                    let content = open(input).await?;
                    storage.write_extraction(&workspace, &library, &file, &method, content, options).await
                },
                inputs => {
                    let mut shards = Vec::with_capacity(inputs.len());
                    for input in inputs {
                        shards.push(open(input).await?);
                    }
                    storage.write_sharded_extraction(&workspace, &library, &file, &method, shards, options).await
                },
            }
            .or_raise(|| ErrorKind::Storage)?;
            print_json(&metadata).await
        },
        ExtractionCommand::Cat { workspace, library, file, method } => {
            let stream = storage
                .read_extraction(&workspace, &library, &file, &method)
                .await
                .or_raise(|| ErrorKind::Storage)?;
            copy_to_stdout(stream).await
        },
        ExtractionCommand::Show { workspace, library, file, method } => {
            let metadata = storage
                .get_extraction_metadata(&workspace, &library, &file, &method)
                .await
                .or_raise(|| ErrorKind::Storage)?;
            print_json(&metadata).await
        },
    }
}

/// A file, or stdin for `-`, as a runtime-agnostic reader.
async fn open(input: &Path) -> Result<ContentReader> {
    if input.as_os_str() == STDIN {
        return Ok(Box::new(tokio::io::stdin().compat()));
    }
    let file = tokio::fs::File::open(input).await.or_raise(|| ErrorKind::Read(input.to_path_buf()))?;
    Ok(Box::new(file.compat()))
}

fn parse_json(raw: &str) -> Result<Value> {
    serde_json::from_str(raw).or_raise(|| ErrorKind::Input(format!("not valid JSON: {raw}")))
}

fn parse_settings(details: &Details) -> Result<Option<Value>> {
    let settings = details.settings.as_deref().map(parse_json).transpose()?;
    if let Some(settings) = &settings
        && !settings.is_object()
    {
        exn::bail!(ErrorKind::Input("settings must be a JSON object".to_string()));
    }
    Ok(settings)
}

fn group_update(details: Details) -> Result<GroupUpdate> {
    let settings = parse_settings(&details)?;
    if details.name.is_none() && settings.is_none() {
        exn::bail!(ErrorKind::Input("nothing to update; pass --name and/or --settings".to_string()));
    }
    Ok(GroupUpdate { name: details.name, settings })
}

async fn print_json<T: serde::Serialize>(value: &T) -> Result<()> {
    let mut json = serde_json::to_vec_pretty(value).or_raise(|| ErrorKind::Output)?;
    json.push(b'\n');
    write_stdout(&json).await
}

async fn print_lines(lines: Vec<String>) -> Result<()> {
    let mut out = lines.join("\n");
    if !out.is_empty() {
        out.push('\n');
    }
    write_stdout(out.as_bytes()).await
}

async fn write_stdout(bytes: &[u8]) -> Result<()> {
    let mut out = stdout();
    out.write_all(bytes).await.or_raise(|| ErrorKind::Output)?;
    out.flush().await.or_raise(|| ErrorKind::Output)
}

async fn copy_to_stdout(mut stream: ContentStream) -> Result<()> {
    let mut out = stdout();
    while let Some(chunk) = stream.try_next().await.or_raise(|| ErrorKind::Storage)? {
        out.write_all(&chunk).await.or_raise(|| ErrorKind::Output)?;
    }
    out.flush().await.or_raise(|| ErrorKind::Output)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn details(name: Option<&str>, settings: Option<&str>) -> Details {
        Details {
            name: name.map(str::to_string),
            settings: settings.map(str::to_string),
        }
    }

    #[rstest]
    #[case(None, None, false)]
    #[case(Some("Legal"), None, true)]
    #[case(None, Some(r#"{"ocr": true}"#), true)]
    #[case(None, Some("[1, 2]"), false)]
    #[case(None, Some("{oops"), false)]
    fn test_group_update(#[case] name: Option<&str>, #[case] settings: Option<&str>, #[case] ok: bool) {
        assert_eq!(group_update(details(name, settings)).is_ok(), ok);
    }

    #[tokio::test]
    async fn test_open_missing_input() {
        let dir = tempfile::tempdir().unwrap();
        let Err(err) = open(&dir.path().join("missing.pdf")).await else {
            panic!("opened a missing file");
        };
        assert!(matches!(&*err, ErrorKind::Read(_)));
    }
}
