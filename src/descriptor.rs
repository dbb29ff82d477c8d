//! Compose descriptor and lifecycle scripts for a newly provisioned project.

use std::net::Ipv4Addr;

pub const COMPOSE_FILE: &str = "docker-compose.yml";
pub const START_SCRIPT: &str = "start.sh";
pub const STOP_SCRIPT: &str = "stop.sh";

/// Single-service compose file publishing `port` on container port 80 and
/// attaching the service to its own network on `subnet`.
pub fn compose(project: &str, port: u16, subnet: &str, gateway: Ipv4Addr) -> String {
    format!(
        r#"version: '2'

services:

  {project}:
    image: php:7.4-apache
    container_name: {project}
    ports:
      - "{port}:80"
    networks:
      - "hosting"
    restart: always
    volumes:
      - ./src:/var/www/html
      - ./scripts/:/scripts/
      - ./etc/php/php.ini:/usr/local/etc/php/php.ini
    command: >
      bash -c "a2enmod rewrite
      && apache2-foreground"

networks:
  hosting:
    ipam:
      config:
      - subnet: {subnet}
        gateway: {gateway}
"#
    )
}

pub fn start_script(project: &str) -> String {
    format!("#!/bin/bash\ndocker-compose --project-name=\"{project}\" up -d\n")
}

pub fn stop_script(project: &str) -> String {
    format!("#!/bin/bash\ndocker-compose --project-name=\"{project}\" down\n")
}
