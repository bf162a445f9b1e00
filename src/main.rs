use clap::{arg, command, value_parser, ArgAction};
use hack_emu::parse::file_basename;
use hack_emu::simulators::cpu::CpuEngine;
use hack_emu::simulators::hdl::HdlEngine;
use hack_emu::simulators::vm::VmEngine;
use hack_emu::ExecState;
use std::collections::HashMap;
use std::fs;
use std::path::PathBuf;
use std::process::exit;
use walkdir::WalkDir;

type FileMap = HashMap<String, String>;

fn find_files(dir: &PathBuf) -> HashMap<&'static str, FileMap> {
    let mut files: HashMap<&'static str, FileMap> = HashMap::new();

    for entry in WalkDir::new(dir)
        .into_iter()
        .filter_map(Result::ok)
        .filter(|e| !e.file_type().is_dir())
    {
        let path = entry.into_path();
        let name = path.file_name().and_then(|x| x.to_str());
        let ext = path.extension().and_then(|x| x.to_str());

        if let (Some(name), Some(ext)) = (name, ext) {
            let key = match ext {
                "vm" => "vm",
                "hack" => "hack",
                "hdl" => "hdl",
                "tst" => "tst",
                "cmp" => "cmp",
                _ => continue,
            };
            match fs::read_to_string(&path) {
                Ok(content) => {
                    files.entry(key).or_default().insert(name.to_owned(), content);
                }
                Err(e) => {
                    eprintln!("Could not read '{}': {}", name, e);
                    exit(1);
                }
            }
        }
    }

    files
}

fn run_hdl_test(dir: &PathBuf, files: &HashMap<&'static str, FileMap>) -> i32 {
    let empty = FileMap::new();
    let tst_files = files.get("tst").unwrap_or(&empty);
    let cmp_files = files.get("cmp").unwrap_or(&empty);

    let (tst_name, tst_content) = match tst_files.iter().next() {
        Some(entry) => entry,
        None => {
            eprintln!("No .tst script found");
            return 1;
        }
    };

    if tst_files.len() > 1 {
        eprintln!("Expected 0 or 1 test scripts");
        return 1;
    }

    // the cmp file named by the script convention shares the tst basename
    let cmp_content = cmp_files
        .get(&format!("{}.cmp", file_basename(tst_name)))
        .cloned()
        .unwrap_or_default();

    let mut engine = HdlEngine::default();
    engine.add_search_path(dir.clone());

    let state = engine.run_test_string(tst_content, &cmp_content, tst_name);
    print!("{}", engine.output_table());

    if state == ExecState::Error {
        eprintln!("{}", engine.error_message());
        return 2;
    }

    println!("{}: OK", tst_name);
    0
}

fn run_vm_program(files: &HashMap<&'static str, FileMap>, steps: u64) -> i32 {
    let empty = FileMap::new();
    let vm_files = files.get("vm").unwrap_or(&empty);

    let mut sorted: Vec<(&String, &String)> = vm_files.iter().collect();
    sorted.sort();

    let mut engine = VmEngine::default();
    {
        let mut parser = hack_emu::parse::bytecode::Parser::default();
        for (name, content) in sorted {
            if let Err(e) = parser.parse_string(content, name) {
                eprintln!("{}", e);
                return 1;
            }
        }
        engine.load(parser.into_program());
    }

    let state = engine.run_for(steps);
    match state {
        ExecState::Error => {
            eprintln!(
                "{} (at command {})",
                engine.error_message(),
                engine.error_location()
            );
            2
        }
        _ => {
            println!("{:?} after {} commands", state, engine.stats().instructions_executed);
            println!("{}", engine.memory().dump_state());
            0
        }
    }
}

fn run_hack_program(files: &HashMap<&'static str, FileMap>, steps: u64) -> i32 {
    let empty = FileMap::new();
    let hack_files = files.get("hack").unwrap_or(&empty);

    let (name, content) = match hack_files.iter().next() {
        Some(entry) => entry,
        None => {
            eprintln!("No .hack program found");
            return 1;
        }
    };

    let mut cpu = CpuEngine::default();
    if let Err(e) = cpu.load_string(content, name) {
        eprintln!("{}", e);
        return 1;
    }

    let state = cpu.run_for(steps);
    match state {
        ExecState::Error => {
            eprintln!("{} (at ROM {})", cpu.error_message(), cpu.error_location());
            2
        }
        _ => {
            println!("{:?} after {} instructions", state, cpu.stats().instructions_executed);
            println!("A={} D={} PC={}", cpu.a(), cpu.d(), cpu.pc());
            0
        }
    }
}

fn main() {
    env_logger::init();

    let dir_arg = arg!([dir] "The directory which contains the program and tests")
        .required(true)
        .value_parser(value_parser!(PathBuf));

    let steps_arg = arg!(-s --steps <STEPS> "Maximum number of instructions to execute")
        .value_parser(value_parser!(u64))
        .default_value("1000000");

    let hdl_arg = arg!(--hdl "Run the directory's .tst script against the HDL engine")
        .action(ArgAction::SetTrue);

    let cpu_arg = arg!(--cpu "Run the directory's .hack program on the CPU engine")
        .action(ArgAction::SetTrue);

    let matches = command!()
        .arg(dir_arg)
        .arg(steps_arg)
        .arg(hdl_arg)
        .arg(cpu_arg)
        .get_matches();

    let dir = matches.get_one::<PathBuf>("dir").expect("required arg");
    let steps = *matches.get_one::<u64>("steps").expect("defaulted arg");
    let use_hdl = *matches.get_one::<bool>("hdl").expect("flag");
    let use_cpu = *matches.get_one::<bool>("cpu").expect("flag");

    let files = find_files(dir);

    let code = if use_hdl {
        run_hdl_test(dir, &files)
    } else if use_cpu {
        run_hack_program(&files, steps)
    } else {
        run_vm_program(&files, steps)
    };

    exit(code);
}
