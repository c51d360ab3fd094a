use yupost_log as logging;
use yupost_wallet::tool::{parse_args_from, run, usage, ToolAction};

fn main() {
    let args = match parse_args_from(std::env::args().skip(1)) {
        Ok(ToolAction::Help) => {
            println!("{}", usage());
            return;
        }
        Ok(ToolAction::Run(args)) => args,
        Err(err) => {
            eprintln!("{err}\n\n{}", usage());
            std::process::exit(2);
        }
    };
    logging::init(args.config.log.clone());

    let output = run(&args).and_then(|value| {
        serde_json::to_string_pretty(&value).map_err(|err| err.to_string())
    });
    match output {
        Ok(json) => println!("{json}"),
        Err(err) => {
            logging::log_error!("wallet tool failed: {err}");
            eprintln!("{err}");
            std::process::exit(1);
        }
    }
}
