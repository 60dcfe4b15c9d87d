//! Routing directives: `%%connect`, `%connect`, `%%host`, `%%bash`.

use crate::directive::{ArgSpec, Directive, Param, ParsedArgs, ValueKind};
use crate::engine::{FanOut, Flow, Kernel};
use crate::error::Result;
use crate::output::Style;

pub(super) fn directives() -> Vec<Directive> {
    vec![
        Directive::section(
            "connect",
            ArgSpec::new()
                .about("Evaluate code sequentially on named devices.")
                .epilog(
                    "Examples:\n\n  %%connect --host --all\n  # evaluate on host and all connected devices\n  import sys\n  print(sys.platform)\n\n  %%connect mcu1 mcu2\n  # evaluate on named devices mcu1, mcu2\n  print('hello world')",
                )
                .param(Param::flag("quiet").short('q').help("suppress terminal output"))
                .param(Param::flag("all").help("run code on all connected devices"))
                .param(Param::flag("host").help("run code on the host"))
                .param(
                    Param::positional("names", ValueKind::Str)
                        .zero_or_more()
                        .help("device names, uids or urls"),
                ),
            connect_section,
        ),
        Directive::section(
            "host",
            ArgSpec::new().about("Pass cell to the host for evaluation."),
            host_section,
        ),
        Directive::section(
            "bash",
            ArgSpec::new()
                .about("Pass cell to bash shell for evaluation.")
                .epilog("Example:\n  %%bash\n  printenv"),
            bash_section,
        ),
        Directive::line(
            "connect",
            ArgSpec::new()
                .about("Connect to device")
                .epilog(
                    "Examples:\n    %connect my_device\n    %connect my_device exec\n    %connect 'exec:///usr/bin/python3'\n\nNote: device must be registered for connect to work (see %discover and %register).",
                )
                .param(Param::positional("hostname", ValueKind::Str).help("hostname, uid, or url"))
                .param(
                    Param::positional("schemes", ValueKind::Str)
                        .zero_or_more()
                        .help("connection scheme"),
                )
                .param(Param::flag("quiet").short('q').help("no output (except errors)")),
            connect_line,
        ),
    ]
}

fn connect_section(kernel: &mut Kernel, args: &ParsedArgs, body: Option<&str>) -> Result<Flow> {
    let body = body.unwrap_or_default();
    if body.is_empty() {
        return Ok(Flow::Continue);
    }
    let plan = FanOut {
        host: args.flag("host"),
        all: args.flag("all"),
        names: args.strings("names"),
        quiet: args.flag("quiet"),
    };
    kernel.fan_out(&plan, body)
}

fn host_section(kernel: &mut Kernel, _args: &ParsedArgs, body: Option<&str>) -> Result<Flow> {
    kernel.run_host(body.unwrap_or_default())?;
    Ok(Flow::Continue)
}

fn bash_section(kernel: &mut Kernel, _args: &ParsedArgs, body: Option<&str>) -> Result<Flow> {
    kernel.run_bash(body.unwrap_or_default())?;
    Ok(Flow::Continue)
}

fn connect_line(kernel: &mut Kernel, args: &ParsedArgs, _body: Option<&str>) -> Result<Flow> {
    let hostname = args.string("hostname").unwrap_or_default();
    let schemes = args.strings("schemes");
    let schemes = (!schemes.is_empty()).then_some(schemes);

    match kernel.devices().get_device(hostname, schemes.as_deref()) {
        Some(device) => {
            kernel.set_default_device(&device)?;
            if !args.flag("quiet") {
                kernel.output().print_styled(
                    format!("Connected to {} @ {}", device.name, device.url),
                    Style::BANNER,
                    "\n",
                );
            }
            Ok(Flow::Continue)
        }
        None => Ok(Flow::stop(format!("Device not available: '{hostname}'"))),
    }
}
