use clap::{Parser as ClapParser, Subcommand};
use std::{process, sync::Arc};

use encoding::{MethodSignature, parse};
use objrt::{
    AssociationKey, AssociationPolicy, Class, Imp, PropertyAttribute, Runtime, RuntimeError,
};

#[derive(ClapParser, Debug)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Raise the log level (-v debug, -vv trace); RUST_LOG overrides
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Build a small Animal/Dog hierarchy and print what the runtime knows
    Demo,
    /// Parse type encodings and print their structure, size and alignment
    Encoding {
        #[arg(required = true, help = "Encodings such as i, ^{P=dd} or [4c]")]
        texts: Vec<String>,

        /// Treat each input as a method signature like v24@0:8i16
        #[arg(long, help = "Parse inputs as method signatures")]
        method: bool,
    },
}

extern "C" fn animal_speak() {}
extern "C" fn dog_speak() {}
extern "C" fn animal_create() {}

static NICKNAME: u8 = 0;

fn imp_of(f: extern "C" fn()) -> Imp {
    Imp::from_ptr(f as *const ()).unwrap_or(objrt::FORWARD_SENTINEL)
}

fn build_demo(rt: &Runtime) -> Result<(Class, Class), RuntimeError> {
    let named = rt.allocate_protocol("Named")?;
    rt.protocol_add_method_description(named, rt.sel_register_name("name"), "@16@0:8", true, true)?;
    rt.register_protocol(named)?;

    let animal = rt.allocate_class_pair(None, "Animal", 0)?;
    rt.class_add_ivar(animal, "legs", 4, 2, "i")?;
    rt.class_add_ivar(animal, "name", 8, 3, "@\"NSString\"")?;
    rt.register_class_pair(animal)?;
    rt.class_add_protocol(animal, named)?;
    rt.class_add_property(
        animal,
        "name",
        &[
            PropertyAttribute::new("T", "@\"NSString\""),
            PropertyAttribute::flag("C"),
            PropertyAttribute::new("V", "name"),
        ],
    )?;

    let speak = rt.sel_register_name("speak");
    rt.class_add_method(animal, speak, imp_of(animal_speak), "v16@0:8")?;
    let meta = rt.class_get_meta_class(animal).ok_or(RuntimeError::NotAClass)?;
    rt.class_add_method(meta, rt.sel_register_name("create"), imp_of(animal_create), "@16@0:8")?;

    let dog = rt.allocate_class_pair(Some(animal), "Dog", 0)?;
    rt.class_add_ivar(dog, "good", 1, 0, "B")?;
    rt.register_class_pair(dog)?;
    rt.class_add_method(dog, speak, imp_of(dog_speak), "v16@0:8")?;

    Ok((animal, dog))
}

fn print_class(rt: &Runtime, cls: Class) {
    let name = rt.class_get_name(cls).unwrap_or_else(|| Arc::from("?"));
    let superclass = rt
        .class_get_superclass(cls)
        .and_then(|sup| rt.class_get_name(sup))
        .map_or_else(|| "(root)".to_owned(), |sup| sup.to_string());
    println!(
        "class {name} : {superclass}  size={}",
        rt.class_get_instance_size(cls).unwrap_or(0)
    );

    for ivar in rt.class_copy_ivar_list(cls) {
        println!(
            "  ivar   {:<8} @{:<3} {} bytes  {}",
            ivar.name(),
            ivar.offset(),
            ivar.size(),
            ivar.type_encoding()
        );
    }
    for method in rt.class_copy_method_list(cls) {
        let selector = rt.sel_get_name(method.name()).unwrap_or_else(|| Arc::from("?"));
        println!(
            "  method -{selector:<7} {:?}  {} args  {}",
            method.implementation(),
            method.number_of_arguments(),
            method.type_encoding()
        );
    }
    if let Some(meta) = rt.class_get_meta_class(cls) {
        for method in rt.class_copy_method_list(meta) {
            let selector = rt.sel_get_name(method.name()).unwrap_or_else(|| Arc::from("?"));
            println!("  method +{selector:<7} {:?}", method.implementation());
        }
    }
    for proto in rt.class_copy_protocol_list(cls) {
        if let Some(proto_name) = rt.protocol_get_name(proto) {
            println!("  adopts <{proto_name}>");
        }
    }
    for property in rt.class_copy_property_list(cls) {
        println!("  property {} \"{}\"", property.name(), property.attributes());
    }
}

fn run_demo() -> Result<(), RuntimeError> {
    let rt = Runtime::global();
    let (animal, dog) = build_demo(rt)?;
    for cls in rt.copy_class_list() {
        print_class(rt, cls);
    }

    let speak = rt.sel_register_name("speak");
    let rex = rt.create_instance(dog, 0)?;
    rt.set_associated_object(
        rex,
        AssociationKey::of(&NICKNAME),
        Some(Arc::new(String::from("Rex"))),
        AssociationPolicy::Copy,
    );
    let nickname = rt
        .get_associated_object(rex, AssociationKey::of(&NICKNAME))
        .and_then(|value| value.downcast_ref::<String>().cloned());

    println!();
    println!(
        "{:?} is a {} nicknamed {}",
        rex,
        rt.object_get_class_name(rex).as_deref().unwrap_or("?"),
        nickname.as_deref().unwrap_or("-")
    );
    if let Some(cls) = rt.object_get_class(rex) {
        println!("  [rex speak]    -> {:?}", rt.get_method_implementation(cls, speak));
    }
    println!("  [Animal speak] -> {:?}", rt.get_method_implementation(animal, speak));
    let fetch = rt.sel_register_name("fetch");
    println!("  [rex fetch]    -> {:?} (forwarded)", rt.get_method_implementation(dog, fetch));

    // SAFETY: `rex` is not used after this point
    unsafe { rt.dispose_instance(rex) };
    Ok(())
}

fn describe_encoding(text: &str) -> Result<(), encoding::EncodingError> {
    let ty = parse(text)?;
    let size = ty.size().map_or_else(|| "-".to_owned(), |s| s.to_string());
    let align = ty.alignment().map_or_else(|| "-".to_owned(), |a| a.to_string());
    println!("{text}");
    println!("  canonical {ty}");
    println!("  size {size}  align {align}");
    println!("  {ty:#?}");
    Ok(())
}

fn describe_signature(text: &str) -> Result<(), encoding::EncodingError> {
    let sig = MethodSignature::parse(text)?;
    println!("{text}");
    println!("  returns {}", sig.return_type().text);
    for (i, arg) in sig.arguments().iter().enumerate() {
        let offset = arg.offset.map_or_else(String::new, |o| format!(" @{o}"));
        println!("  arg {i}   {}{offset}", arg.text);
    }
    if let Some(frame) = sig.frame_size() {
        println!("  frame {frame}");
    }
    Ok(())
}

fn main() {
    let cli = Cli::parse();

    let level = match cli.verbose {
        0 => "warn",
        1 => "debug",
        _ => "trace",
    };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level)).init();

    match cli.command {
        Command::Demo => {
            if let Err(err) = run_demo() {
                eprintln!("demo failed: {err}");
                process::exit(1);
            }
        }
        Command::Encoding { texts, method } => {
            let mut failed = false;
            for text in &texts {
                let result = if method {
                    describe_signature(text)
                } else {
                    describe_encoding(text)
                };
                if let Err(err) = result {
                    eprintln!("{text}: {err}");
                    failed = true;
                }
            }
            if failed {
                process::exit(1);
            }
        }
    }
}
