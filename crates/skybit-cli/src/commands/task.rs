use anyhow::{Result, bail};
use comfy_table::Cell;
use skybit_core::models::{ScheduleKind, ToolToggle};
use skybit_core::{AppCore, LastRun, TaskPatch, TaskSchedule, TaskSnapshot, TaskSpec};

use crate::cli::{CreateTaskArgs, OutputFormat, TaskCommands, UpdateTaskArgs};
use crate::commands::utils::{format_timestamp, parse_schema, truncate};
use crate::output::json::print_json;
use crate::output::table::{new_table, print_table};

pub async fn run(core: &AppCore, command: TaskCommands, format: OutputFormat) -> Result<()> {
    // One-shot commands never start the clock, but next-run times are only
    // known once triggers are rebuilt.
    core.lifecycle().restore()?;

    match command {
        TaskCommands::List => list_tasks(core, format),
        TaskCommands::Show { id } => show_task(core, &id, format),
        TaskCommands::Create(args) => create_task(core, args, format),
        TaskCommands::Update(args) => update_task(core, args, format),
        TaskCommands::Delete { id } => delete_task(core, &id, format),
        TaskCommands::Enable { id } => {
            let task = core.lifecycle().enable(&id)?;
            print_summary(&task, "Task enabled", format)
        }
        TaskCommands::Disable { id } => {
            let task = core.lifecycle().disable(&id)?;
            print_summary(&task, "Task disabled", format)
        }
        TaskCommands::Run { id } => run_task(core, &id, format).await,
        TaskCommands::Steps { id } => show_steps(core, &id, format),
    }
}

fn list_tasks(core: &AppCore, format: OutputFormat) -> Result<()> {
    let tasks = core.lifecycle().list()?;

    if format.is_json() {
        return print_json(&tasks);
    }

    if tasks.is_empty() {
        println!("No tasks found.");
        return Ok(());
    }

    let mut table = new_table(vec!["ID", "Name", "Schedule", "Enabled", "Last Run", "Next Run"]);
    for task in tasks {
        let last = match &task.outcome.last {
            Some(LastRun::Success { .. }) => "success",
            Some(LastRun::Error { .. }) => "error",
            None => "-",
        };
        table.add_row(vec![
            Cell::new(&task.definition.id),
            Cell::new(&task.definition.name),
            Cell::new(task.definition.schedule.to_string()),
            Cell::new(if task.definition.enabled { "yes" } else { "no" }),
            Cell::new(format!(
                "{} ({last})",
                format_timestamp(task.outcome.last_run_at)
            )),
            Cell::new(format_timestamp(task.next_run_at)),
        ]);
    }

    print_table(table)
}

fn show_task(core: &AppCore, id: &str, format: OutputFormat) -> Result<()> {
    let task = core.lifecycle().get(id)?;

    if format.is_json() {
        return print_json(&task);
    }

    let def = &task.definition;
    println!("ID:          {}", def.id);
    println!("Name:        {}", def.name);
    if !def.description.is_empty() {
        println!("Description: {}", def.description);
    }
    println!("Prompt:      {}", truncate(&def.prompt, 100));
    println!("Instance:    {}", def.instance_type);
    println!("Provider:    {}", def.model_provider);
    if let Some(system_prompt) = &def.system_prompt {
        println!("System:      {}", truncate(system_prompt, 100));
    }
    println!("Schedule:    {}", def.schedule);
    let tools: Vec<&str> = def
        .tools
        .iter()
        .filter(|t| t.enabled)
        .map(|t| t.name.as_str())
        .collect();
    if !tools.is_empty() {
        println!("Tools:       {}", tools.join(", "));
    }
    println!("Enabled:     {}", def.enabled);
    println!("Created:     {}", format_timestamp(Some(def.created_at)));
    println!("Updated:     {}", format_timestamp(Some(def.updated_at)));
    println!("Next Run:    {}", format_timestamp(task.next_run_at));
    println!("Last Run:    {}", format_timestamp(task.outcome.last_run_at));
    match &task.outcome.last {
        Some(LastRun::Success { text, .. }) => {
            println!("Result:      {}", truncate(text, 200));
        }
        Some(LastRun::Error { message, .. }) => {
            println!("Error:       {message}");
        }
        None => {}
    }
    println!("Success:     {}", task.outcome.success_count);
    println!("Failed:      {}", task.outcome.failure_count);
    if core.lifecycle().is_running(id) {
        println!("Running:     yes");
    }

    Ok(())
}

fn create_task(core: &AppCore, args: CreateTaskArgs, format: OutputFormat) -> Result<()> {
    let schedule = match (args.interval, args.cron) {
        (_, Some(expression)) => TaskSchedule::cron(expression),
        (Some(minutes), None) => TaskSchedule::interval(minutes),
        (None, None) => TaskSchedule::default(),
    };

    let mut spec = TaskSpec::new(args.name, args.prompt)
        .with_schedule(schedule)
        .with_enabled(!args.disabled);
    spec.description = args.description;
    spec.instance_type = args.instance.parse()?;
    spec.model_provider = args.provider.parse()?;
    spec.system_prompt = args.system_prompt;
    spec.tools = tool_toggles(args.tools);
    spec.schema = args.schema.as_deref().map(parse_schema).transpose()?;

    let task = core.lifecycle().create(spec)?;
    print_summary(&task, "Task created", format)
}

fn update_task(core: &AppCore, args: UpdateTaskArgs, format: OutputFormat) -> Result<()> {
    let schedule_type = match args.schedule_type.as_deref() {
        Some(raw) => Some(raw.parse::<ScheduleKind>()?),
        // A lone --cron or --interval implies the kind.
        None => match (args.interval, &args.cron) {
            (None, Some(_)) => Some(ScheduleKind::Cron),
            (Some(_), None) => Some(ScheduleKind::Interval),
            _ => None,
        },
    };

    let system_prompt = if args.clear_system_prompt {
        Some(None)
    } else {
        args.system_prompt.map(Some)
    };
    let schema = if args.clear_schema {
        Some(None)
    } else {
        args.schema.as_deref().map(parse_schema).transpose()?.map(Some)
    };

    let patch = TaskPatch {
        name: args.name,
        description: args.description,
        prompt: args.prompt,
        instance_type: args.instance.as_deref().map(str::parse).transpose()?,
        model_provider: args.provider.as_deref().map(str::parse).transpose()?,
        system_prompt,
        schedule_type,
        interval_minutes: args.interval,
        cron_expression: args.cron,
        tools: (!args.tools.is_empty()).then(|| tool_toggles(args.tools)),
        enabled: args.enabled,
        schema,
    };

    let task = core.lifecycle().update(&args.id, patch)?;
    print_summary(&task, "Task updated", format)
}

fn delete_task(core: &AppCore, id: &str, format: OutputFormat) -> Result<()> {
    core.lifecycle().delete(id)?;

    if format.is_json() {
        return print_json(&serde_json::json!({"deleted": true, "id": id}));
    }

    println!("Task deleted: {id}");
    Ok(())
}

async fn run_task(core: &AppCore, id: &str, format: OutputFormat) -> Result<()> {
    let outcome = core.lifecycle().run_and_wait(id).await?;

    if format.is_json() {
        print_json(&outcome)?;
    } else {
        for step in &outcome.steps {
            println!("  - {}", truncate(&step.text, 100));
        }
    }

    match outcome.last {
        Some(LastRun::Success { text, output, .. }) => {
            if !format.is_json() {
                println!("Task {id} succeeded: {text}");
                if let Some(output) = output {
                    println!("{}", serde_json::to_string_pretty(&output)?);
                }
            }
            Ok(())
        }
        Some(LastRun::Error { message, .. }) => bail!("Task {id} failed: {message}"),
        None => bail!("Task {id} finished without an outcome"),
    }
}

fn show_steps(core: &AppCore, id: &str, format: OutputFormat) -> Result<()> {
    let steps = core.lifecycle().steps(id)?;

    if format.is_json() {
        return print_json(&steps);
    }

    if steps.is_empty() {
        println!("No steps recorded for {id}.");
        return Ok(());
    }

    for (index, step) in steps.iter().enumerate() {
        println!(
            "{:>3}. [{}] {}",
            index + 1,
            format_timestamp(Some(step.timestamp)),
            step.text
        );
        for call in step.tool_calls.iter().flatten() {
            println!("       {} {}", call.tool_name, call.args);
        }
    }
    Ok(())
}

fn print_summary(task: &TaskSnapshot, action: &str, format: OutputFormat) -> Result<()> {
    if format.is_json() {
        return print_json(task);
    }

    println!("{action}: {} ({})", task.definition.name, task.definition.id);
    println!("Next run: {}", format_timestamp(task.next_run_at));
    Ok(())
}

fn tool_toggles(names: Vec<String>) -> Vec<ToolToggle> {
    names
        .into_iter()
        .map(|name| ToolToggle::new(name.trim().to_ascii_lowercase(), true))
        .collect()
}
