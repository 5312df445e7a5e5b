use super::*;
use std::path::Path;
use std::time::Duration;
use tempfile::TempDir;

fn write_script(dir: &Path, name: &str, body: &str) {
    let stage_dir = dir.join("lib").join("pipeline");
    std::fs::create_dir_all(&stage_dir).unwrap();
    std::fs::write(stage_dir.join(name), body).unwrap();
}

fn sh_stage(dir: &TempDir, name: &str) -> StageCommand {
    StageCommand::new("sh", Path::new("lib/pipeline").join(name), "args.json").in_dir(dir.path())
}

#[tokio::test]
async fn test_stage_rewrites_transfer_file() {
    let dir = TempDir::new().unwrap();
    write_script(dir.path(), "double", "printf '{\"n\":2}' > \"$1\"\n");
    std::fs::write(dir.path().join("args.json"), r#"{"n":1}"#).unwrap();

    let output = TokioProcessRunner.run(sh_stage(&dir, "double")).await.unwrap();

    assert!(output.status.success());
    assert!(output.stdout.is_empty());
    assert_eq!(
        std::fs::read_to_string(dir.path().join("args.json")).unwrap(),
        r#"{"n":2}"#
    );
}

#[tokio::test]
async fn test_stage_output_is_captured_per_stream() {
    let dir = TempDir::new().unwrap();
    write_script(
        dir.path(),
        "noisy",
        "echo 'to stdout'\necho 'to stderr' >&2\nexit 4\n",
    );

    let output = TokioProcessRunner.run(sh_stage(&dir, "noisy")).await.unwrap();

    assert_eq!(output.status, ExitStatus::Error(4));
    assert_eq!(output.stdout, "to stdout\n");
    assert_eq!(output.stderr, "to stderr\n");
}

#[tokio::test]
async fn test_missing_interpreter() {
    let dir = TempDir::new().unwrap();
    let command = StageCommand::new("nonexistent-interpreter-12345", "stage0", "args.json")
        .in_dir(dir.path());

    let result = TokioProcessRunner.run(command).await;
    assert!(matches!(result, Err(ProcessError::InterpreterNotFound(_))));
}

#[tokio::test]
async fn test_hung_stage_times_out() {
    let dir = TempDir::new().unwrap();
    write_script(dir.path(), "hang", "sleep 5\n");
    let command = sh_stage(&dir, "hang").with_timeout(Some(Duration::from_millis(100)));

    let result = TokioProcessRunner.run(command).await;
    assert!(matches!(result, Err(ProcessError::Timeout(_))));
}

#[tokio::test]
async fn test_mock_writes_transfer_in_working_dir() {
    let dir = TempDir::new().unwrap();
    let (manager, mock) = SubprocessManager::mock();
    mock.on_stage("stage0.py")
        .writes_transfer(r#"{"done":true}"#)
        .prints("progress\n")
        .install();

    let command = StageCommand::new("python", "lib/pipeline/stage0.py", "args.json")
        .in_dir(dir.path());
    let output = manager.run(command.clone()).await.unwrap();

    assert_eq!(output.stdout, "progress\n");
    assert_eq!(
        std::fs::read_to_string(dir.path().join("args.json")).unwrap(),
        r#"{"done":true}"#
    );
    assert_eq!(mock.calls(), vec![command]);
}

#[tokio::test]
async fn test_mock_rejects_unscripted_stage() {
    let (manager, mock) = SubprocessManager::mock();
    mock.on_stage("stage0").exits_with(2).prints_stderr("bad\n").install();

    let output = manager
        .run(StageCommand::new("python", "stage0", "args.json"))
        .await
        .unwrap();
    assert_eq!(output.status, ExitStatus::Error(2));
    assert_eq!(output.stderr, "bad\n");

    let result = manager
        .run(StageCommand::new("python", "stage1", "args.json"))
        .await;
    assert!(matches!(result, Err(ProcessError::Unscripted(stage)) if stage == "stage1"));
    assert_eq!(mock.calls().len(), 2);
}
