use colored::Colorize;
use pb_protocol::{
    ConnectionFailure, ConnectionState, ConnectionStatus, CrmInfo, CrmInit, DealChanges, DealRef,
    DealUpdate, Envelope, InitAck, InstallBridge, MessageType, NavigateRequest, PipelineData,
    PipelineDeal, PipelineStage, Source, StageChange, SyncDeals,
};
use std::fs;
use std::path::Path;
use ts_rs::TS;

fn export<T: TS + 'static>(out: &Path, written: &mut Vec<String>) -> color_eyre::Result<()> {
    T::export_all_to(out)?;
    written.push(T::name());
    Ok(())
}

pub fn run(out: &Path) -> color_eyre::Result<()> {
    fs::create_dir_all(out)?;

    let mut written = Vec::new();
    export::<Envelope>(out, &mut written)?;
    export::<Source>(out, &mut written)?;
    export::<MessageType>(out, &mut written)?;
    export::<CrmInfo>(out, &mut written)?;
    export::<PipelineData>(out, &mut written)?;
    export::<InstallBridge>(out, &mut written)?;
    export::<CrmInit>(out, &mut written)?;
    export::<InitAck>(out, &mut written)?;
    export::<SyncDeals>(out, &mut written)?;
    export::<DealUpdate>(out, &mut written)?;
    export::<DealRef>(out, &mut written)?;
    export::<StageChange>(out, &mut written)?;
    export::<ConnectionFailure>(out, &mut written)?;
    export::<NavigateRequest>(out, &mut written)?;
    export::<PipelineDeal>(out, &mut written)?;
    export::<DealChanges>(out, &mut written)?;
    export::<PipelineStage>(out, &mut written)?;
    export::<ConnectionState>(out, &mut written)?;
    export::<ConnectionStatus>(out, &mut written)?;

    println!(
        "{} {} protocol types to {}",
        "Exported".green().bold(),
        written.len(),
        out.display()
    );
    for name in written {
        println!("  {name}.ts");
    }
    Ok(())
}
