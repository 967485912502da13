use super::Shared;
use crossbeam_channel::{Receiver, RecvError, Sender};
use std::sync::Arc;
use threadpool::ThreadPool;

pub(super) enum WriterCommand {
    /// Released blocks are queued.
    Wake,
    /// Drain the queue, then signal.
    Join(Sender<()>),
    /// Drain the queue, then exit.
    Shutdown,
}

pub(super) fn spawn(tp: &ThreadPool, shared: Arc<Shared>, command_rx: Receiver<WriterCommand>) {
    tp.execute(move || run(shared, command_rx));
}

fn run(shared: Arc<Shared>, command_rx: Receiver<WriterCommand>) {
    loop {
        match command_rx.recv() {
            Err(RecvError) | Ok(WriterCommand::Shutdown) => break,
            Ok(WriterCommand::Wake) => shared.write_queued(),
            Ok(WriterCommand::Join(done)) => {
                shared.write_queued();
                let _ = done.send(());
            }
        }
    }

    shared.write_queued();
    tracing::debug!("block writer stopped");
}
