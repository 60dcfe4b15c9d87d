//! Device management directives.

use crate::directive::{ArgSpec, Directive, Param, ParsedArgs, ValueKind};
use crate::engine::{Flow, Kernel};
use crate::error::Result;
use crate::output::Style;

pub(super) fn directives() -> Vec<Directive> {
    vec![
        Directive::line(
            "discover",
            ArgSpec::new()
                .about("Discover available devices")
                .param(Param::flag("verbose").short('v').help("show uid")),
            discover,
        ),
        Directive::line(
            "register",
            ArgSpec::new()
                .about("Register device")
                .epilog("Examples:\n    %register 'exec:///bin/sh'\n    %register exec://python3 --name py")
                .param(Param::positional("url", ValueKind::Str).help("register device by url"))
                .param(Param::option("name", ValueKind::Str).help("device name (default: derived from url)")),
            register,
        ),
        Directive::line(
            "unregister",
            ArgSpec::new()
                .about("Unregister device")
                .epilog("Examples:\n    %unregister my_device\n    %unregister 'exec:///bin/sh'")
                .param(Param::positional("name", ValueKind::Str).help("name, uid or url of the device")),
            unregister,
        ),
        Directive::line(
            "softreset",
            ArgSpec::new()
                .about("Reset the current device.")
                .epilog(
                    "Purges all variables and releases all resources.\n\nExample:\n    a = 5\n    %softreset\n    print(a)   # NameError: name 'a' isn't defined",
                )
                .param(Param::flag("quiet").short('q').help("suppress terminal output")),
            softreset,
        ),
        Directive::line(
            "info",
            ArgSpec::new().about("Summary about connected device"),
            info,
        ),
    ]
}

fn discover(kernel: &mut Kernel, args: &ParsedArgs, _body: Option<&str>) -> Result<Flow> {
    let devices = kernel.devices().devices();
    if devices.is_empty() {
        kernel.output().print("No devices available");
        return Ok(Flow::Continue);
    }
    let name_width = devices.iter().map(|d| d.name.len()).max().unwrap_or(0);
    let url_width = devices.iter().map(|d| d.url.len()).max().unwrap_or(0);
    let verbose = args.flag("verbose");
    for device in &devices {
        let uid = if verbose { device.uid.as_str() } else { "" };
        let line = format!("{:name_width$}  {:url_width$}  {}", device.name, device.url, uid);
        kernel.output().print(line.trim_end());
    }
    Ok(Flow::Continue)
}

fn register(kernel: &mut Kernel, args: &ParsedArgs, _body: Option<&str>) -> Result<Flow> {
    let url = args.string("url").unwrap_or_default();
    match kernel.devices().register(url, args.string("name")) {
        Ok(device) => {
            kernel
                .output()
                .print(format!("Registered {} @ {}", device.name, device.url));
            Ok(Flow::Continue)
        }
        Err(e) => Ok(Flow::stop(e.to_string())),
    }
}

fn unregister(kernel: &mut Kernel, args: &ParsedArgs, _body: Option<&str>) -> Result<Flow> {
    let name = args.string("name").unwrap_or_default();
    match kernel.devices().unregister(name) {
        Ok(device) => {
            if kernel.context().current.as_ref() == Some(&device) {
                kernel.set_current(None);
            }
            Ok(Flow::Continue)
        }
        Err(e) => Ok(Flow::stop(e.to_string())),
    }
}

fn softreset(kernel: &mut Kernel, args: &ParsedArgs, _body: Option<&str>) -> Result<Flow> {
    let mut lease = kernel.acquire_current()?;
    let quiet = args.flag("quiet");
    let output = kernel.output();
    if !quiet {
        output.print("");
        output.print_styled("!!!!!!!!!!!!!!!!!!!!!!!!!!!!!!!", Style::ALERT, "\n");
        output.print_styled("!!!!!   softreset ...     !!!!!", Style::ALERT, "\n");
        output.print_styled("!!!!!!!!!!!!!!!!!!!!!!!!!!!!!!!", Style::ALERT, "");
    }
    lease.softreset()?;
    if !quiet {
        output.print("\n");
    }
    Ok(Flow::Continue)
}

fn info(kernel: &mut Kernel, _args: &ParsedArgs, _body: Option<&str>) -> Result<Flow> {
    let mut lease = kernel.acquire_current()?;
    let session = lease.describe()?;
    let target = lease.target();
    let output = kernel.output();
    output.print(format!("{:15} {}", "name", target.name));
    output.print(format!("{:15} {}", "uid", target.uid));
    output.print(format!("{:15} {}", "url", target.url));
    output.print(format!("{:15} {}", "transport", target.scheme()));
    output.print(format!("{:15} {}", "session", session));
    Ok(Flow::Continue)
}
